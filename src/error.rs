//! Error taxonomy shared by every layer of the client.

use crate::digest::Fingerprint;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ProveItError>;

/// Coarse error categories callers can branch on without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed fingerprint, missing file, wrong file type.
    InvalidInput,
    /// Unresolvable endpoint or contract address, bad configuration file.
    Configuration,
    /// A write was attempted without a signing identity.
    Permission,
    /// Endpoint unreachable or the node answered with an unusable response.
    Connection,
    /// The contract rejected the call (revert, failed receipt).
    Contract,
    /// A certificate was requested for an unregistered fingerprint.
    NotFound,
    /// The confirmation wait exceeded the configured bound.
    Timeout,
}

/// Errors reported by the registration/verification client.
#[derive(Debug, Error)]
pub enum ProveItError {
    #[error("invalid input: {0}")]
    /// Input failed validation before any network I/O.
    InvalidInput(String),
    #[error("file not found: {}", .0.display())]
    /// The path handed to the digest engine does not exist.
    MissingFile(PathBuf),
    #[error("configuration error: {0}")]
    /// Endpoint, address, or configuration file could not be resolved.
    Configuration(String),
    #[error("no signing identity configured; write operations are disabled")]
    /// Write attempted on a read-only client.
    MissingSigner,
    #[error("connection error: {0}")]
    /// Transport-level failure reaching the RPC node.
    Connection(String),
    #[error("contract error: {0}")]
    /// On-chain logic rejection, e.g. a duplicate registration.
    Contract(String),
    #[error("rpc error {code}: {message}")]
    /// The node returned a JSON-RPC error that is not a contract revert.
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Node-supplied error message.
        message: String,
    },
    #[error("unexpected node response: {0}")]
    /// The node answered, but the payload could not be interpreted.
    Protocol(String),
    #[error("fingerprint {0} is not registered")]
    /// Certificate requested for a fingerprint with no registration.
    NotRegistered(Fingerprint),
    #[error("nothing to certify: {0}")]
    /// Certificate requested from a record that carries no registration.
    NothingToCertify(String),
    #[error("transaction {tx_id} not confirmed within {}s", .waited.as_secs())]
    /// The transaction was submitted but no receipt arrived in time.
    Timeout {
        /// Hash of the submitted transaction.
        tx_id: String,
        /// How long the client waited before giving up.
        waited: Duration,
    },
    #[error("io error: {0}")]
    /// Filesystem failure while hashing or writing artifacts.
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    /// Serialization failure for configuration or certificate artifacts.
    Json(#[from] serde_json::Error),
}

impl ProveItError {
    /// Maps the error onto its taxonomy bucket.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) | Self::MissingFile(_) | Self::Io(_) => ErrorKind::InvalidInput,
            Self::Configuration(_) | Self::Json(_) => ErrorKind::Configuration,
            Self::MissingSigner => ErrorKind::Permission,
            Self::Connection(_) | Self::Rpc { .. } | Self::Protocol(_) => ErrorKind::Connection,
            Self::Contract(_) => ErrorKind::Contract,
            Self::NotRegistered(_) | Self::NothingToCertify(_) => ErrorKind::NotFound,
            Self::Timeout { .. } => ErrorKind::Timeout,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorKind, ProveItError};
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(
            ProveItError::MissingFile(PathBuf::from("a.txt")).kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(ProveItError::MissingSigner.kind(), ErrorKind::Permission);
        assert_eq!(
            ProveItError::Contract("Hash already registered".into()).kind(),
            ErrorKind::Contract
        );
        let timeout = ProveItError::Timeout {
            tx_id: "0xabc".into(),
            waited: Duration::from_secs(5),
        };
        assert_eq!(timeout.kind(), ErrorKind::Timeout);
        assert_eq!(
            ProveItError::NothingToCertify("record has no fingerprint".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            timeout.to_string(),
            "transaction 0xabc not confirmed within 5s"
        );
    }
}
