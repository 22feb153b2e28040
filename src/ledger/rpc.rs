//! JSON-RPC 2.0 plumbing: the transport seam, the HTTP transport, and quantity helpers.

use crate::error::ProveItError;
use crate::ledger::abi;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default per-request HTTP timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON-RPC error object as returned by a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional `0x`-hex payload (revert data for contract failures).
    pub data: Option<String>,
}

impl RpcError {
    /// `-32602`: the request parameters were unusable.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
            data: None,
        }
    }

    /// `-32000`: server-side failure.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: -32000,
            message: message.into(),
            data: None,
        }
    }

    /// `-32601`: unknown method.
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("method not found: {method}"),
            data: None,
        }
    }

    /// Code `3`: contract execution reverted with an `Error(string)` reason.
    pub fn reverted(reason: &str) -> Self {
        Self {
            code: 3,
            message: format!("execution reverted: {reason}"),
            data: Some(format!("0x{}", hex::encode(abi::encode_error_reason(reason)))),
        }
    }

    /// True when the node reports a contract-level revert.
    pub fn is_revert(&self) -> bool {
        self.code == 3
            || self.message.to_ascii_lowercase().contains("revert")
            || self.revert_reason_from_data().is_some()
    }

    /// Best-effort revert reason: decoded payload first, then the message text.
    pub fn revert_reason(&self) -> String {
        if let Some(reason) = self.revert_reason_from_data() {
            return reason;
        }
        self.message
            .strip_prefix("execution reverted: ")
            .unwrap_or(&self.message)
            .to_string()
    }

    fn revert_reason_from_data(&self) -> Option<String> {
        let raw = self.data.as_deref()?;
        let bytes = hex::decode(raw.strip_prefix("0x").unwrap_or(raw)).ok()?;
        abi::decode_revert(&bytes)
    }

    fn from_value(value: &Value) -> Self {
        let code = value.get("code").and_then(Value::as_i64).unwrap_or(-32000);
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        // Some nodes nest the payload one level deeper.
        let data = match value.get("data") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Object(obj)) => obj.get("data").and_then(Value::as_str).map(str::to_string),
            _ => None,
        };
        Self {
            code,
            message,
            data,
        }
    }

    /// Serialized JSON-RPC error object.
    pub fn to_value(&self) -> Value {
        let mut obj = json!({ "code": self.code, "message": self.message });
        if let Some(data) = &self.data {
            obj["data"] = Value::String(data.clone());
        }
        obj
    }
}

/// Failures below the contract layer.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("endpoint unreachable: {0}")]
    /// Connection refused, DNS failure, request timeout.
    Unreachable(String),
    #[error("http status {status}: {body}")]
    /// Non-success HTTP status.
    Http {
        /// Status code.
        status: u16,
        /// Response body, possibly truncated by the server.
        body: String,
    },
    #[error("rpc error {}: {}", .0.code, .0.message)]
    /// The node answered with a JSON-RPC error object.
    Rpc(RpcError),
    #[error("malformed response: {0}")]
    /// The response was not a JSON-RPC envelope.
    Malformed(String),
}

impl From<TransportError> for ProveItError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unreachable(msg) => ProveItError::Connection(msg),
            TransportError::Http { status, body } => {
                ProveItError::Connection(format!("http status {status}: {body}"))
            }
            TransportError::Rpc(rpc) if rpc.is_revert() => {
                ProveItError::Contract(rpc.revert_reason())
            }
            TransportError::Rpc(rpc) => ProveItError::Rpc {
                code: rpc.code,
                message: rpc.message,
            },
            TransportError::Malformed(msg) => ProveItError::Protocol(msg),
        }
    }
}

/// Anything that can carry a JSON-RPC call to a ledger node.
pub trait Transport: Send + Sync {
    /// Issues `method` with positional `params` and returns the `result` member.
    fn request(&self, method: &str, params: Value) -> Result<Value, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        (**self).request(method, params)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        (**self).request(method, params)
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// Blocking HTTP transport.
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    url: String,
    next_id: AtomicU64,
}

impl HttpTransport {
    /// Builds a transport for `url` with a per-request timeout.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Unreachable(format!("http client error: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Endpoint this transport posts to.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Transport for HttpTransport {
    fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        debug!(method, id, "rpc request");
        let resp = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .map_err(|e| TransportError::Unreachable(format!("{method} request failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(TransportError::Http {
                status: status.as_u16(),
                body,
            });
        }
        let envelope: JsonRpcResponse = resp
            .json()
            .map_err(|e| TransportError::Malformed(format!("{method} decode failed: {e}")))?;
        if let Some(error) = envelope.error {
            return Err(TransportError::Rpc(RpcError::from_value(&error)));
        }
        Ok(envelope.result.unwrap_or(Value::Null))
    }
}

/// Encodes a `u64` as a JSON-RPC quantity (`0x`-hex, no leading zeros).
pub fn to_quantity_u64(value: u64) -> String {
    format!("0x{value:x}")
}

/// Encodes a `u128` as a JSON-RPC quantity.
pub fn to_quantity_u128(value: u128) -> String {
    format!("0x{value:x}")
}

/// Parses a quantity string into a `u64`.
pub fn parse_quantity_u64(value: &Value) -> Result<u64, TransportError> {
    let raw = quantity_digits(value)?;
    u64::from_str_radix(raw, 16)
        .map_err(|e| TransportError::Malformed(format!("invalid quantity '{raw}': {e}")))
}

/// Parses a quantity string into a `u128`.
pub fn parse_quantity_u128(value: &Value) -> Result<u128, TransportError> {
    let raw = quantity_digits(value)?;
    u128::from_str_radix(raw, 16)
        .map_err(|e| TransportError::Malformed(format!("invalid quantity '{raw}': {e}")))
}

fn quantity_digits(value: &Value) -> Result<&str, TransportError> {
    let s = value
        .as_str()
        .ok_or_else(|| TransportError::Malformed(format!("expected hex quantity, got {value}")))?;
    let raw = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .ok_or_else(|| TransportError::Malformed(format!("quantity missing 0x prefix: {s}")))?;
    if raw.is_empty() {
        return Ok("0");
    }
    Ok(raw)
}

/// Decodes a `0x`-prefixed data string.
pub fn decode_data(value: &Value) -> Result<Vec<u8>, TransportError> {
    let s = value
        .as_str()
        .ok_or_else(|| TransportError::Malformed(format!("expected hex data, got {value}")))?;
    let raw = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .ok_or_else(|| TransportError::Malformed(format!("data missing 0x prefix: {s}")))?;
    hex::decode(raw).map_err(|e| TransportError::Malformed(format!("invalid hex data: {e}")))
}

#[cfg(test)]
mod tests {
    use super::{parse_quantity_u64, to_quantity_u128, RpcError, TransportError};
    use crate::error::{ErrorKind, ProveItError};
    use serde_json::json;

    #[test]
    fn quantity_encoding() {
        assert_eq!(to_quantity_u128(0), "0x0");
        assert_eq!(to_quantity_u128(15), "0xf");
        assert_eq!(parse_quantity_u64(&json!("0x1f")).unwrap(), 31);
        assert_eq!(parse_quantity_u64(&json!("0x")).unwrap(), 0);
        assert!(parse_quantity_u64(&json!("31")).is_err());
        assert!(parse_quantity_u64(&json!(31)).is_err());
    }

    #[test]
    fn revert_maps_to_contract_error_with_reason() {
        let err: ProveItError =
            TransportError::Rpc(RpcError::reverted("Hash already registered")).into();
        assert_eq!(err.kind(), ErrorKind::Contract);
        assert_eq!(err.to_string(), "contract error: Hash already registered");
    }

    #[test]
    fn nested_error_data_is_recognised() {
        let reverted = RpcError::reverted("nope");
        let value = json!({
            "code": -32603,
            "message": "Internal error",
            "data": { "data": reverted.data.clone().unwrap() }
        });
        let parsed = RpcError::from_value(&value);
        assert!(parsed.is_revert());
        assert_eq!(parsed.revert_reason(), "nope");
    }

    #[test]
    fn plain_rpc_error_is_not_a_revert() {
        let err: ProveItError = TransportError::Rpc(RpcError::method_not_found("eth_foo")).into();
        assert_eq!(err.kind(), ErrorKind::Connection);
        let unreachable: ProveItError = TransportError::Unreachable("refused".into()).into();
        assert!(matches!(unreachable, ProveItError::Connection(_)));
    }
}
