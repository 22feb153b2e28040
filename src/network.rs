//! Network identities and endpoint resolution.
//!
//! The RPC URL and the registry contract address are resolved independently,
//! each taking the first value found in: caller override, the local deployment
//! registry (`<deployments>/<network>/ProveIt.json`), the built-in defaults.

use crate::address::Address;
use crate::error::{ProveItError, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

/// Directory consulted when no deployments directory is supplied.
pub const DEFAULT_DEPLOYMENTS_DIR: &str = "deployments";
/// File name of a deployment record inside a network directory.
pub const DEPLOYMENT_FILE: &str = "ProveIt.json";

const HOSTED_PROVIDER_DOMAIN: &str = "infura.io";
const PLACEHOLDER_CONTRACT: &str = "0x1234567890123456789012345678901234567890";
/// Address the registry lands at when deployed first from the default dev account.
pub const LOCAL_CONTRACT: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

/// Logical ledger networks the client knows how to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkIdentity {
    /// Main public network.
    Mainnet,
    /// Public test network.
    Goerli,
    /// Sidechain.
    Polygon,
    /// Sidechain test network.
    PolygonMumbai,
    /// Local development node.
    Localhost,
}

impl NetworkIdentity {
    /// Every supported identity, in display order.
    pub const ALL: [NetworkIdentity; 5] = [
        Self::Mainnet,
        Self::Goerli,
        Self::Polygon,
        Self::PolygonMumbai,
        Self::Localhost,
    ];

    /// Canonical name; also the deployment registry directory name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Goerli => "goerli",
            Self::Polygon => "polygon",
            Self::PolygonMumbai => "polygonMumbai",
            Self::Localhost => "localhost",
        }
    }

    /// Chain id the network is expected to report.
    pub fn chain_id(self) -> u64 {
        match self {
            Self::Mainnet => 1,
            Self::Goerli => 5,
            Self::Polygon => 137,
            Self::PolygonMumbai => 80_001,
            Self::Localhost => 31_337,
        }
    }

    fn default_rpc_url(self) -> Option<&'static str> {
        Some(match self {
            Self::Mainnet => "https://mainnet.infura.io/v3/",
            Self::Goerli => "https://goerli.infura.io/v3/",
            Self::Polygon => "https://polygon-mainnet.infura.io/v3/",
            Self::PolygonMumbai => "https://polygon-mumbai.infura.io/v3/",
            Self::Localhost => "http://localhost:8545",
        })
    }

    fn default_contract_address(self) -> Option<&'static str> {
        Some(match self {
            Self::Localhost => LOCAL_CONTRACT,
            _ => PLACEHOLDER_CONTRACT,
        })
    }
}

impl fmt::Display for NetworkIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkIdentity {
    type Err = ProveItError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("hardhat") {
            return Ok(Self::Localhost);
        }
        Self::ALL
            .into_iter()
            .find(|net| net.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| {
                let names = Self::ALL.map(NetworkIdentity::as_str).join(", ");
                ProveItError::invalid(format!(
                    "unknown network '{trimmed}' (expected one of {names})"
                ))
            })
    }
}

impl Serialize for NetworkIdentity {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for NetworkIdentity {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Which resolution layer produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    /// Supplied explicitly by the caller.
    Override,
    /// Read from the local deployment registry.
    Registry,
    /// Taken from the built-in table.
    Default,
}

/// A fully resolved endpoint: where to send RPC calls and which contract to address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Validated http(s) RPC URL.
    pub rpc_url: String,
    /// Registry contract address.
    pub contract_address: Address,
    /// Layer that supplied `rpc_url`.
    pub rpc_source: ValueSource,
    /// Layer that supplied `contract_address`.
    pub address_source: ValueSource,
}

/// Caller-supplied inputs that take precedence over stored and built-in values.
#[derive(Debug, Clone, Default)]
pub struct EndpointOverrides {
    /// Explicit RPC URL.
    pub rpc_url: Option<String>,
    /// Explicit contract address.
    pub contract_address: Option<String>,
    /// Hosted-provider project key appended to open default URLs.
    pub api_key: Option<String>,
    /// Root of the deployment registry; defaults to [`DEFAULT_DEPLOYMENTS_DIR`].
    pub deployments_dir: Option<PathBuf>,
}

/// Deployment record written by the contract deployment tooling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    /// Deployed registry address.
    pub address: String,
    /// Optional RPC URL recorded alongside the deployment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,
    /// Account that deployed the contract.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployer: Option<String>,
    /// ISO-8601 deployment time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_time: Option<String>,
    /// Network name the tooling used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_name: Option<String>,
}

/// Read-only view of a deployment registry directory tree.
#[derive(Debug, Clone)]
pub struct DeploymentRegistry {
    root: PathBuf,
}

impl DeploymentRegistry {
    /// Registry rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the registry.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the record for `network`.
    pub fn record_path(&self, network: NetworkIdentity) -> PathBuf {
        self.root.join(network.as_str()).join(DEPLOYMENT_FILE)
    }

    /// Loads the record for `network`; unreadable or malformed records count as absent.
    pub fn load(&self, network: NetworkIdentity) -> Option<DeploymentRecord> {
        let path = self.record_path(network);
        if !path.is_file() {
            return None;
        }
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "deployment record unreadable");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "deployment record malformed");
                None
            }
        }
    }
}

/// Resolves the endpoint for `network`.
pub fn resolve(network: NetworkIdentity, overrides: &EndpointOverrides) -> Result<EndpointConfig> {
    let registry = DeploymentRegistry::new(
        overrides
            .deployments_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DEPLOYMENTS_DIR)),
    );
    let record = registry.load(network);

    let (rpc_raw, rpc_source) = first_of(
        overrides.rpc_url.clone(),
        record.as_ref().and_then(|r| r.rpc_url.clone()),
        network.default_rpc_url().map(str::to_string),
    )
    .ok_or_else(|| ProveItError::config(format!("no RPC endpoint known for {network}")))?;

    let rpc_raw = match (rpc_source, overrides.api_key.as_deref()) {
        (ValueSource::Default, Some(key)) => append_api_key(&rpc_raw, key),
        _ => rpc_raw,
    };
    let rpc_url = validate_rpc_url(&rpc_raw)?;

    let (address_raw, address_source) = first_of(
        overrides.contract_address.clone(),
        record.as_ref().map(|r| r.address.clone()),
        network.default_contract_address().map(str::to_string),
    )
    .ok_or_else(|| ProveItError::config(format!("no contract address known for {network}")))?;
    let contract_address = Address::parse(&address_raw).map_err(|err| {
        ProveItError::config(format!("invalid contract address for {network}: {err}"))
    })?;

    debug!(
        network = %network,
        rpc_source = ?rpc_source,
        address_source = ?address_source,
        contract = %contract_address,
        "endpoint resolved"
    );

    Ok(EndpointConfig {
        rpc_url,
        contract_address,
        rpc_source,
        address_source,
    })
}

fn first_of(
    explicit: Option<String>,
    stored: Option<String>,
    builtin: Option<String>,
) -> Option<(String, ValueSource)> {
    let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
    non_empty(explicit)
        .map(|v| (v, ValueSource::Override))
        .or_else(|| non_empty(stored).map(|v| (v, ValueSource::Registry)))
        .or_else(|| non_empty(builtin).map(|v| (v, ValueSource::Default)))
}

/// Appends the project key to a hosted-provider URL.
///
/// A URL ending in `/` sits on a path segment boundary and is taken as fully
/// qualified, so it is left alone.
fn append_api_key(url: &str, key: &str) -> String {
    let key = key.trim();
    if key.is_empty() || !url.contains(HOSTED_PROVIDER_DOMAIN) || url.ends_with('/') {
        return url.to_string();
    }
    format!("{url}{key}")
}

fn validate_rpc_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let parsed = Url::parse(trimmed)
        .map_err(|err| ProveItError::config(format!("invalid RPC URL '{trimmed}': {err}")))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ProveItError::config(format!(
                "unsupported RPC URL scheme '{other}' in '{trimmed}'"
            )))
        }
    }
    if parsed.host_str().is_none() {
        return Err(ProveItError::config(format!("RPC URL has no host: '{trimmed}'")));
    }
    Ok(trimmed.to_string())
}
