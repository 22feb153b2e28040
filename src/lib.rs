#![deny(missing_docs)]

//! # proveit
//!
//! `proveit` proves that a piece of content existed at a given time. It hashes
//! the content with SHA-256, anchors the digest together with an owner address
//! and optional metadata in a registry contract on an EVM ledger, and later
//! looks the digest up again to recover who registered it and when.
//!
//! ## Layout
//!
//! * [`digest`]: streaming SHA-256 fingerprints in canonical `0x` form.
//! * [`network`]: network identities and endpoint resolution (override, then
//!   deployment registry, then built-in defaults).
//! * [`ledger`]: JSON-RPC transport, contract ABI codec, EIP-1559 signing, and
//!   the [`LedgerClient`](ledger::LedgerClient).
//! * [`service`]: the [`ProveIt`] entry point for register, verify, batch
//!   verification, and certificate derivation.
//! * [`certificate`]: renders certificates and records as JSON or text.
//! * [`config`]: the user configuration file and client options.
//! * [`devnet`]: an automining local ledger hosting the registry contract,
//!   usable in-process or (feature `devnet`) over HTTP.
//!
//! ## Usage
//!
//! Register and verify content against an in-process devnet:
//!
//! ```rust
//! use proveit::devnet::DevnetChain;
//! use proveit::ledger::{ClientSettings, LedgerClient, SigningIdentity};
//! use proveit::{NetworkIdentity, ProveIt, Subject};
//! use std::sync::Arc;
//!
//! let chain = Arc::new(DevnetChain::default());
//! let signer = SigningIdentity::from_hex(
//!     "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
//! )?;
//! let client = LedgerClient::with_transport(
//!     Arc::clone(&chain),
//!     NetworkIdentity::Localhost,
//!     chain.contract(),
//!     Some(signer),
//!     ClientSettings::default(),
//! )?;
//! let prove = ProveIt::new(client);
//!
//! let subject = Subject::Content(b"chapter one".to_vec());
//! let record = prove.register(&subject, "first draft")?;
//! let check = prove.verify(&subject)?;
//! assert!(check.is_registered());
//! assert_eq!(check.registration.unwrap().owner, record.owner);
//! # Ok::<(), proveit::ProveItError>(())
//! ```

pub mod address;
pub mod certificate;
pub mod config;
pub mod devnet;
pub mod digest;
pub mod error;
pub mod ledger;
pub mod network;
pub mod service;

pub use address::Address;
pub use certificate::{
    render_json, render_text, write_record, Certificate, DescribeFields, FieldEntry,
    CERTIFICATE_SCHEMA,
};
pub use config::{ClientOptions, UserConfig};
pub use digest::{fingerprint_of_bytes, fingerprint_of_file, fingerprint_of_reader, Fingerprint};
pub use error::{ErrorKind, ProveItError, Result};
pub use network::{resolve, EndpointConfig, EndpointOverrides, NetworkIdentity};
pub use service::{
    BatchOutcome, CertificateSource, ProveIt, Registration, RegistrationRecord, Subject,
    VerificationRecord,
};
