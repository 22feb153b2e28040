//! Local development ledger.
//!
//! [`DevnetChain`] is a self-contained automining chain hosting the registry
//! contract. It implements [`Transport`](crate::ledger::Transport), so a
//! [`LedgerClient`](crate::ledger::LedgerClient) can talk to it in-process. With
//! the `devnet` feature it can also be served over HTTP.

pub mod chain;
#[cfg(feature = "devnet")]
pub mod server;

pub use chain::{DevnetChain, DevnetConfig, DEVNET_CHAIN_ID, DEVNET_GAS_PRICE, REGISTER_GAS};
#[cfg(feature = "devnet")]
pub use server::{run_devnet_server, serve, DevnetServerConfig};
