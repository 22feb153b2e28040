//! secp256k1 signing identities.

use crate::address::Address;
use crate::error::{ProveItError, Result};
use crate::ledger::abi::keccak256;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use std::fmt;
use std::fs;
use std::path::Path;

const SECRET_KEY_LENGTH: usize = 32;

/// A private key plus the account address it controls.
///
/// The key never leaves the process: `Debug` is redacted and there is no
/// serialization.
#[derive(Clone)]
pub struct SigningIdentity {
    key: SigningKey,
    address: Address,
}

impl SigningIdentity {
    /// Builds an identity from raw secret scalar bytes.
    pub fn from_bytes(secret: &[u8]) -> Result<Self> {
        if secret.len() != SECRET_KEY_LENGTH {
            return Err(ProveItError::invalid(format!(
                "unexpected key length: {}",
                secret.len()
            )));
        }
        let key = SigningKey::from_slice(secret)
            .map_err(|err| ProveItError::invalid(format!("key decode error: {err}")))?;
        let address = address_of(key.verifying_key());
        Ok(Self { key, address })
    }

    /// Parses a hex private key, with or without `0x`.
    pub fn from_hex(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let raw = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if raw.len() != SECRET_KEY_LENGTH * 2 {
            return Err(ProveItError::invalid(format!(
                "private key must be {} hex digits, got {}",
                SECRET_KEY_LENGTH * 2,
                raw.len()
            )));
        }
        let bytes = hex::decode(raw)
            .map_err(|err| ProveItError::invalid(format!("key decode error: {err}")))?;
        Self::from_bytes(&bytes)
    }

    /// Loads a key file holding either 32 raw bytes or a hex string.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = match fs::read(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProveItError::MissingFile(path.to_path_buf()))
            }
            Err(err) => return Err(err.into()),
        };
        if contents.len() == SECRET_KEY_LENGTH {
            return Self::from_bytes(&contents);
        }
        let text = std::str::from_utf8(&contents)
            .map_err(|_| {
                ProveItError::invalid(format!("key file {} is not hex text", path.display()))
            })?;
        Self::from_hex(text)
    }

    /// Account address derived from the public key.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Signs a 32-byte prehash, returning the signature and its recovery id.
    pub fn sign_prehash(&self, prehash: &[u8; 32]) -> Result<(Signature, RecoveryId)> {
        self.key
            .sign_prehash_recoverable(prehash)
            .map_err(|err| ProveItError::invalid(format!("signing failed: {err}")))
    }
}

impl fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("address", &self.address)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Keccak of the uncompressed public key, last 20 bytes.
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let digest = keccak256(&point.as_bytes()[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[12..]);
    Address::from_bytes(out)
}

#[cfg(test)]
mod tests {
    use super::SigningIdentity;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    const HARDHAT_0: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const HARDHAT_1: &str = "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

    #[test]
    fn known_address_vectors() {
        let zero = SigningIdentity::from_hex(HARDHAT_0).unwrap();
        assert_eq!(
            zero.address().to_string(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
        );
        let one = SigningIdentity::from_hex(HARDHAT_1).unwrap();
        assert_eq!(
            one.address().to_string(),
            "0x70997970C51812dc3A010C7d01b50e0d17dc79C8"
        );
    }

    #[test]
    fn debug_never_prints_key_material() {
        let id = SigningIdentity::from_hex(HARDHAT_0).unwrap();
        let rendered = format!("{id:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("ac0974bec39a17e3"));
    }

    #[test]
    fn rejects_bad_keys() {
        assert!(SigningIdentity::from_hex("0x1234").is_err());
        assert!(SigningIdentity::from_hex(&"0".repeat(64)).is_err());
        assert!(SigningIdentity::from_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn loads_hex_and_raw_key_files() {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("proveit_signer_{unique}"));
        fs::create_dir_all(&dir).unwrap();

        let hex_path = dir.join("key.hex");
        fs::write(&hex_path, format!("{HARDHAT_0}\n")).unwrap();
        let from_hex = SigningIdentity::from_file(&hex_path).unwrap();

        let raw_path = dir.join("key.bin");
        fs::write(&raw_path, hex::decode(&HARDHAT_0[2..]).unwrap()).unwrap();
        let from_raw = SigningIdentity::from_file(&raw_path).unwrap();

        assert_eq!(from_hex.address(), from_raw.address());
        assert!(SigningIdentity::from_file(&dir.join("absent")).is_err());
        let _ = fs::remove_dir_all(dir);
    }
}
