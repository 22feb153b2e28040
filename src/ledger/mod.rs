//! Ledger access: JSON-RPC transport, ABI codec, transaction signing, and the
//! registry client built on top of them.

pub mod abi;
pub mod client;
pub mod rpc;
pub mod signer;
pub mod tx;

pub use client::{
    ClientSettings, ConfirmationPolicy, LedgerClient, RawLookupResult, RawRegistration,
    RawTxResult, DEFAULT_CONFIRMATION_TIMEOUT, DEFAULT_GAS_LIMIT, DEFAULT_POLL_INTERVAL,
};
pub use rpc::{HttpTransport, RpcError, Transport, TransportError};
pub use signer::SigningIdentity;
