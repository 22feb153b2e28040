//! Persistent user configuration and client option assembly.

use crate::error::{ProveItError, Result};
use crate::ledger::{ClientSettings, ConfirmationPolicy, SigningIdentity};
use crate::network::{EndpointOverrides, NetworkIdentity};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Network used when neither a flag nor the configuration file names one.
pub const DEFAULT_NETWORK: NetworkIdentity = NetworkIdentity::Polygon;

/// Keys accepted by [`UserConfig::set`], in display order.
pub const CONFIG_KEYS: [&str; 7] = [
    "network",
    "rpc_url",
    "contract_address",
    "deployments_dir",
    "gas_limit",
    "confirmation_timeout_secs",
    "poll_interval_ms",
];

/// Location of the configuration file under a home directory.
pub fn default_path_in(home: &Path) -> PathBuf {
    home.join(".proveit").join("config.json")
}

/// Defaults persisted in `~/.proveit/config.json`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    /// Default network.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkIdentity>,
    /// RPC URL override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,
    /// Contract address override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    /// Deployment registry root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployments_dir: Option<PathBuf>,
    /// Gas limit for registrations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<u64>,
    /// Confirmation wait bound, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation_timeout_secs: Option<u64>,
    /// Receipt polling interval, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
}

impl UserConfig {
    /// Loads `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| {
            ProveItError::config(format!("malformed config {}: {e}", path.display()))
        })
    }

    /// Persists to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }

    /// Sets `key` to `value`, or clears it when `value` is `None`.
    pub fn set(&mut self, key: &str, value: Option<&str>) -> Result<()> {
        fn number(key: &str, value: Option<&str>) -> Result<Option<u64>> {
            value
                .map(|v| {
                    v.trim().parse::<u64>().map_err(|_| {
                        ProveItError::invalid(format!("{key} expects an integer, got '{v}'"))
                    })
                })
                .transpose()
        }
        match key {
            "network" => self.network = value.map(str::parse::<NetworkIdentity>).transpose()?,
            "rpc_url" => self.rpc_url = value.map(str::to_string),
            "contract_address" => {
                if let Some(v) = value {
                    crate::address::Address::parse(v)?;
                }
                self.contract_address = value.map(str::to_string);
            }
            "deployments_dir" => self.deployments_dir = value.map(PathBuf::from),
            "gas_limit" => self.gas_limit = number(key, value)?,
            "confirmation_timeout_secs" => self.confirmation_timeout_secs = number(key, value)?,
            "poll_interval_ms" => self.poll_interval_ms = number(key, value)?,
            other => {
                return Err(ProveItError::invalid(format!(
                    "unknown config key '{other}' (expected one of {})",
                    CONFIG_KEYS.join(", ")
                )))
            }
        }
        Ok(())
    }

    /// `(key, value)` pairs for display; unset keys carry `None`.
    pub fn entries(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("network", self.network.map(|n| n.to_string())),
            ("rpc_url", self.rpc_url.clone()),
            ("contract_address", self.contract_address.clone()),
            (
                "deployments_dir",
                self.deployments_dir.as_ref().map(|p| p.display().to_string()),
            ),
            ("gas_limit", self.gas_limit.map(|v| v.to_string())),
            (
                "confirmation_timeout_secs",
                self.confirmation_timeout_secs.map(|v| v.to_string()),
            ),
            ("poll_interval_ms", self.poll_interval_ms.map(|v| v.to_string())),
        ]
    }

    /// Client settings with file values layered over the built-in defaults.
    pub fn settings(&self) -> ClientSettings {
        let defaults = ClientSettings::default();
        ClientSettings {
            gas_limit: self.gas_limit.unwrap_or(defaults.gas_limit),
            confirmation: ConfirmationPolicy {
                poll_interval: self
                    .poll_interval_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.confirmation.poll_interval),
                timeout: self
                    .confirmation_timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.confirmation.timeout),
            },
            request_timeout: defaults.request_timeout,
        }
    }

    /// Options with no signer; callers attach one and apply flag overrides.
    pub fn to_options(&self) -> ClientOptions {
        ClientOptions {
            network: self.network.unwrap_or(DEFAULT_NETWORK),
            overrides: EndpointOverrides {
                rpc_url: self.rpc_url.clone(),
                contract_address: self.contract_address.clone(),
                api_key: None,
                deployments_dir: self.deployments_dir.clone(),
            },
            signer: None,
            settings: self.settings(),
        }
    }
}

/// Everything needed to open a [`ProveIt`](crate::service::ProveIt) service.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Target network.
    pub network: NetworkIdentity,
    /// Endpoint overrides.
    pub overrides: EndpointOverrides,
    /// Signing identity; `None` for a read-only client.
    pub signer: Option<SigningIdentity>,
    /// Client tunables.
    pub settings: ClientSettings,
}

impl ClientOptions {
    /// Read-only options for `network` with default settings.
    pub fn new(network: NetworkIdentity) -> Self {
        Self {
            network,
            overrides: EndpointOverrides::default(),
            signer: None,
            settings: ClientSettings::default(),
        }
    }

    /// Attaches a signing identity.
    pub fn with_signer(mut self, signer: SigningIdentity) -> Self {
        self.signer = Some(signer);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{default_path_in, UserConfig, DEFAULT_NETWORK};
    use crate::error::ErrorKind;
    use crate::network::NetworkIdentity;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    fn temp_path(name: &str) -> PathBuf {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        std::env::temp_dir()
            .join(format!("proveit_config_{name}_{unique}"))
            .join("config.json")
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = UserConfig::load(&temp_path("missing")).unwrap();
        assert_eq!(cfg, UserConfig::default());
        let opts = cfg.to_options();
        assert_eq!(opts.network, DEFAULT_NETWORK);
        assert_eq!(opts.settings.gas_limit, 200_000);
        assert_eq!(opts.settings.confirmation.timeout, Duration::from_secs(120));
        assert!(opts.signer.is_none());
    }

    #[test]
    fn save_and_reload() {
        let path = temp_path("roundtrip");
        let mut cfg = UserConfig::default();
        cfg.set("network", Some("hardhat")).unwrap();
        cfg.set("gas_limit", Some("250000")).unwrap();
        cfg.set("poll_interval_ms", Some("250")).unwrap();
        cfg.save(&path).unwrap();

        let loaded = UserConfig::load(&path).unwrap();
        assert_eq!(loaded.network, Some(NetworkIdentity::Localhost));
        let settings = loaded.settings();
        assert_eq!(settings.gas_limit, 250_000);
        assert_eq!(settings.confirmation.poll_interval, Duration::from_millis(250));
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"network\": \"localhost\""));
        assert!(!raw.contains("rpc_url"));
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn malformed_file_is_a_configuration_error() {
        let path = temp_path("malformed");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"{ not json").unwrap();
        assert_eq!(
            UserConfig::load(&path).unwrap_err().kind(),
            ErrorKind::Configuration
        );
        fs::write(&path, br#"{"network": "atlantis"}"#).unwrap();
        assert_eq!(
            UserConfig::load(&path).unwrap_err().kind(),
            ErrorKind::Configuration
        );
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn set_validates_and_clears() {
        let mut cfg = UserConfig::default();
        assert!(cfg.set("network", Some("atlantis")).is_err());
        assert!(cfg.set("gas_limit", Some("lots")).is_err());
        assert!(cfg.set("contract_address", Some("0x12")).is_err());
        assert!(cfg.set("colour", Some("blue")).is_err());
        cfg.set("rpc_url", Some("http://127.0.0.1:8545")).unwrap();
        assert_eq!(cfg.to_options().overrides.rpc_url.as_deref(), Some("http://127.0.0.1:8545"));
        cfg.set("rpc_url", None).unwrap();
        assert!(cfg.rpc_url.is_none());
    }

    #[test]
    fn default_path_layout() {
        assert_eq!(
            default_path_in(Path::new("/home/ada")),
            PathBuf::from("/home/ada/.proveit/config.json")
        );
    }
}
