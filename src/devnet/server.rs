//! HTTP/1.1 JSON-RPC listener in front of a [`DevnetChain`].

use crate::devnet::chain::DevnetChain;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io;
use std::net::SocketAddr;
use std::str;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time;
use tracing::{debug, warn};

const MAX_HEADER_BYTES: usize = 32 * 1024;
const MAX_BODY_BYTES: usize = 1024 * 1024;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

const CORS_HEADERS: [(&str, &str); 3] = [
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Methods", "POST, OPTIONS, GET"),
    ("Access-Control-Allow-Headers", "content-type"),
];

/// Request line plus the one header the devnet cares about.
#[derive(Debug, PartialEq, Eq)]
struct RequestHead {
    method: String,
    path: String,
    content_length: usize,
}

impl RequestHead {
    fn parse(text: &str) -> io::Result<Self> {
        let mut lines = text.lines().map(str::trim_end).filter(|line| !line.is_empty());
        let request_line = lines.next().ok_or_else(|| invalid("missing request line"))?;
        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or_default().to_ascii_uppercase();
        let path = parts.next().unwrap_or("/").to_string();

        let mut content_length = 0;
        for (name, value) in lines.filter_map(|line| line.split_once(':')) {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value
                    .trim()
                    .parse()
                    .map_err(|_| invalid("content-length is not a number"))?;
            }
        }
        Ok(Self {
            method,
            path,
            content_length,
        })
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    method: String,
    #[serde(default)]
    params: Value,
    id: Option<Value>,
}

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct DevnetServerConfig {
    /// Socket address to bind.
    pub listen: SocketAddr,
    /// Per-connection read timeout.
    pub request_timeout: Duration,
}

impl DevnetServerConfig {
    /// Config with the default read timeout.
    pub fn new(listen: SocketAddr) -> Self {
        Self {
            listen,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

/// Binds `cfg.listen` and serves until the process exits.
pub async fn run_devnet_server(cfg: DevnetServerConfig, chain: Arc<DevnetChain>) -> io::Result<()> {
    let listener = TcpListener::bind(cfg.listen).await?;
    let addr = listener.local_addr()?;
    println!(
        "QSYS|mod=DEVNET|evt=LISTEN|addr={}|chain_id={}|contract={}",
        addr,
        chain.config().chain_id,
        chain.contract()
    );
    serve(listener, chain, cfg.request_timeout).await
}

/// Accept loop over an already-bound listener.
pub async fn serve(
    listener: TcpListener,
    chain: Arc<DevnetChain>,
    request_timeout: Duration,
) -> io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let chain = Arc::clone(&chain);
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, &chain, request_timeout).await {
                warn!(%peer, error = %err, "devnet connection error");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    chain: &DevnetChain,
    request_timeout: Duration,
) -> io::Result<()> {
    let mut reader = BufReader::new(stream);
    let (status, reply) = match time::timeout(request_timeout, read_request(&mut reader)).await {
        Ok(Ok((head, body))) => route(&head, &body, chain),
        Ok(Err(err)) => (
            "400 Bad Request",
            Some(rpc_error(-32700, &format!("parse error: {err}"))),
        ),
        Err(_) => {
            debug!("devnet request timed out");
            ("408 Request Timeout", Some(rpc_error(-32700, "read timeout")))
        }
    };
    let mut stream = reader.into_inner();
    stream.write_all(&encode_reply(status, reply.as_ref())).await?;
    stream.shutdown().await
}

/// Reads the head line by line, then exactly `content-length` body bytes.
async fn read_request<R>(reader: &mut R) -> io::Result<(RequestHead, Vec<u8>)>
where
    R: AsyncBufRead + Unpin,
{
    let mut head = Vec::new();
    loop {
        let line_start = head.len();
        let budget = (MAX_HEADER_BYTES - line_start) as u64 + 1;
        let read = (&mut *reader).take(budget).read_until(b'\n', &mut head).await?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before end of headers",
            ));
        }
        if head.len() > MAX_HEADER_BYTES {
            return Err(invalid("header too large"));
        }
        if matches!(&head[line_start..], b"\r\n" | b"\n") && line_start > 0 {
            break;
        }
    }

    let text = str::from_utf8(&head).map_err(|_| invalid("header is not utf-8"))?;
    let parsed = RequestHead::parse(text)?;
    if parsed.content_length > MAX_BODY_BYTES {
        return Err(invalid("content-length exceeds limit"));
    }
    let mut body = vec![0u8; parsed.content_length];
    reader.read_exact(&mut body).await?;
    Ok((parsed, body))
}

fn route(head: &RequestHead, body: &[u8], chain: &DevnetChain) -> (&'static str, Option<Value>) {
    match (head.method.as_str(), head.path.as_str()) {
        ("OPTIONS", _) => ("204 No Content", None),
        ("GET", "/healthz") => (
            "200 OK",
            Some(json!({
                "status": "ok",
                "service": "proveit-devnet",
                "chain_id": chain.config().chain_id,
                "block_number": chain.block_number(),
            })),
        ),
        ("POST", _) => match serde_json::from_slice::<JsonRpcRequest>(body) {
            Ok(call) => {
                let id = call.id.unwrap_or(Value::Null);
                let reply = match chain.handle(&call.method, &call.params) {
                    Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
                    Err(err) => json!({"jsonrpc": "2.0", "id": id, "error": err.to_value()}),
                };
                ("200 OK", Some(reply))
            }
            Err(err) => (
                "400 Bad Request",
                Some(rpc_error(-32700, &format!("parse error: {err}"))),
            ),
        },
        _ => (
            "405 Method Not Allowed",
            Some(rpc_error(-32600, "invalid request method")),
        ),
    }
}

fn rpc_error(code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": Value::Null,
        "error": {"code": code, "message": message},
    })
}

/// Serializes a reply; `None` means an empty body with no content type.
fn encode_reply(status: &str, reply: Option<&Value>) -> Vec<u8> {
    let payload = reply.map(Value::to_string).unwrap_or_default();
    let mut head = format!("HTTP/1.1 {status}\r\n");
    if reply.is_some() {
        head.push_str("Content-Type: application/json\r\n");
    }
    for (name, value) in CORS_HEADERS {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n",
        payload.len()
    ));
    let mut out = head.into_bytes();
    out.extend_from_slice(payload.as_bytes());
    out
}

fn invalid(message: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

#[cfg(test)]
mod tests {
    use super::{encode_reply, read_request, serve, RequestHead, MAX_BODY_BYTES};
    use crate::devnet::chain::DevnetChain;
    use crate::error::ErrorKind;
    use crate::ledger::{ClientSettings, ConfirmationPolicy, LedgerClient, SigningIdentity};
    use crate::network::{
        resolve, EndpointOverrides, NetworkIdentity, ValueSource, LOCAL_CONTRACT,
    };
    use std::net::SocketAddr;
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;

    fn read_raw(raw: &[u8]) -> std::io::Result<(RequestHead, Vec<u8>)> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime");
        let mut reader = raw;
        runtime.block_on(read_request(&mut reader))
    }

    #[test]
    fn head_parsing_ignores_header_case_and_defaults_length() {
        let head = RequestHead::parse("post /rpc HTTP/1.1\r\nCONTENT-LENGTH: 12\r\n\r\n").unwrap();
        assert_eq!(head.method, "POST");
        assert_eq!(head.path, "/rpc");
        assert_eq!(head.content_length, 12);

        let bare = RequestHead::parse("GET /healthz HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        assert_eq!(bare.content_length, 0);
        assert!(RequestHead::parse("POST / HTTP/1.1\r\nContent-Length: lots\r\n").is_err());
        assert!(RequestHead::parse("\r\n").is_err());
    }

    #[test]
    fn request_body_is_read_to_declared_length() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 4\r\n\r\nabcdEXTRA";
        let (head, body) = read_raw(raw).unwrap();
        assert_eq!(head.content_length, 4);
        assert_eq!(body, b"abcd");

        let short = b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc";
        let err = read_raw(short).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);

        let oversized = format!(
            "POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n",
            MAX_BODY_BYTES + 1
        );
        assert!(read_raw(oversized.as_bytes()).is_err());

        let endless = format!("GET / HTTP/1.1\r\nX-Pad: {}\r\n", "a".repeat(40 * 1024));
        assert!(read_raw(endless.as_bytes()).is_err());
    }

    #[test]
    fn preflight_reply_has_no_body_or_content_type() {
        let reply = String::from_utf8(encode_reply("204 No Content", None)).unwrap();
        assert!(reply.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert!(reply.contains("Access-Control-Allow-Origin: *\r\n"));
        assert!(reply.contains("Content-Length: 0\r\n"));
        assert!(!reply.contains("Content-Type"));
        assert!(reply.ends_with("\r\n\r\n"));
    }

    fn spawn_devnet() -> SocketAddr {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .expect("runtime");
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                    .await
                    .expect("bind");
                tx.send(listener.local_addr().expect("addr")).expect("send addr");
                let chain = Arc::new(DevnetChain::default());
                let _ = serve(listener, chain, Duration::from_secs(5)).await;
            });
        });
        rx.recv_timeout(Duration::from_secs(10)).expect("devnet address")
    }

    #[test]
    fn register_and_lookup_over_http() {
        let addr = spawn_devnet();
        let overrides = EndpointOverrides {
            rpc_url: Some(format!("http://{addr}")),
            ..EndpointOverrides::default()
        };
        let endpoint = resolve(NetworkIdentity::Localhost, &overrides).expect("endpoint");
        assert_eq!(endpoint.rpc_source, ValueSource::Override);
        assert_eq!(endpoint.contract_address.to_string(), LOCAL_CONTRACT);

        let signer = SigningIdentity::from_hex(
            "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
        )
        .expect("key");
        let owner = signer.address();
        let settings = ClientSettings {
            confirmation: ConfirmationPolicy {
                poll_interval: Duration::from_millis(20),
                timeout: Duration::from_secs(10),
            },
            ..ClientSettings::default()
        };
        let client =
            LedgerClient::connect(NetworkIdentity::Localhost, &endpoint, Some(signer), settings)
                .expect("connect");
        assert_eq!(client.chain_id(), 31337);

        let fp = crate::digest::fingerprint_of_bytes(b"over the wire").to_string();
        let written = client.submit_registration(&fp, "http").expect("register");
        assert_eq!(written.owner, owner);
        assert_eq!(written.block_number, 1);

        let found = client.lookup(&fp).expect("lookup");
        let registration = found.registration.expect("registered");
        assert_eq!(registration.owner, owner);
        assert_eq!(registration.metadata, "http");
        assert_eq!(registration.timestamp, written.timestamp);
        assert!(client.is_registered(&fp).expect("isRegistered"));
        assert_eq!(client.owner_of(&fp).expect("owner"), owner);
        assert_eq!(client.metadata_of(&fp).expect("metadata"), "http");

        let dup = client.submit_registration(&fp, "again").unwrap_err();
        assert_eq!(dup.kind(), ErrorKind::Contract);
    }
}
