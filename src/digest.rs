//! Content fingerprints: SHA-256 digests in canonical `0x`-prefixed lowercase hex.

use crate::error::{ProveItError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::str::FromStr;

/// Files are streamed through the hasher in chunks of this size.
pub const CHUNK_SIZE: usize = 8 * 1024;

/// A 32-byte content digest.
///
/// The canonical string form is `0x` followed by 64 lowercase hex digits. Parsing
/// accepts either prefix case, no prefix at all, and mixed-case digits, so two
/// fingerprints compare equal exactly when their canonical strings do.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Wraps raw digest bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes, as passed to the contract's `bytes32` argument.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parses and normalizes a user-supplied hex digest.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let raw = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if raw.len() != 64 {
            return Err(ProveItError::invalid(format!(
                "fingerprint must be 32 bytes (64 hex digits), got {} digits",
                raw.len()
            )));
        }
        let mut out = [0u8; 32];
        hex::decode_to_slice(raw, &mut out)
            .map_err(|err| ProveItError::invalid(format!("malformed fingerprint hex: {err}")))?;
        Ok(Self(out))
    }

    /// Canonical `0x`-prefixed lowercase form.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = ProveItError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Fingerprint of an in-memory buffer.
pub fn fingerprint_of_bytes(buffer: &[u8]) -> Fingerprint {
    let digest: [u8; 32] = Sha256::digest(buffer).into();
    Fingerprint(digest)
}

/// Fingerprint of everything `reader` yields, consumed in [`CHUNK_SIZE`] pieces.
pub fn fingerprint_of_reader<R: Read>(mut reader: R) -> Result<Fingerprint> {
    let mut hasher = Sha256::new();
    let mut chunk = [0u8; CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        hasher.update(&chunk[..n]);
    }
    Ok(Fingerprint(hasher.finalize().into()))
}

/// Fingerprint of a regular file, streamed so large files never sit in memory.
pub fn fingerprint_of_file(path: impl AsRef<Path>) -> Result<Fingerprint> {
    let path = path.as_ref();
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(ProveItError::MissingFile(path.to_path_buf()))
        }
        Err(err) => return Err(err.into()),
    };
    if !meta.is_file() {
        return Err(ProveItError::invalid(format!(
            "not a regular file: {}",
            path.display()
        )));
    }
    let file = File::open(path)?;
    fingerprint_of_reader(file)
}

#[cfg(test)]
mod tests {
    use super::{fingerprint_of_bytes, fingerprint_of_file, Fingerprint, CHUNK_SIZE};
    use crate::error::{ErrorKind, ProveItError};
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_path(name: &str) -> PathBuf {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        std::env::temp_dir().join(format!("proveit_digest_{name}_{unique}"))
    }

    #[test]
    fn known_sha256_vector() {
        let fp = fingerprint_of_bytes(b"abc");
        assert_eq!(
            fp.to_string(),
            "0xba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(fp.to_string().len(), 66);
    }

    #[test]
    fn file_matches_bytes_across_chunk_boundaries() {
        let path = temp_path("chunks");
        let payload: Vec<u8> = (0..(CHUNK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &payload).expect("write payload");
        let from_file = fingerprint_of_file(&path).expect("hash file");
        assert_eq!(from_file, fingerprint_of_bytes(&payload));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn missing_file_and_directory_are_rejected() {
        let missing = temp_path("missing");
        match fingerprint_of_file(&missing) {
            Err(ProveItError::MissingFile(path)) => assert_eq!(path, missing),
            other => panic!("expected MissingFile, got {other:?}"),
        }

        let dir = temp_path("dir");
        fs::create_dir_all(&dir).expect("create dir");
        let err = fingerprint_of_file(&dir).expect_err("directory must fail");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(matches!(err, ProveItError::InvalidInput(_)));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn parse_normalizes_prefix_and_case() {
        let canonical = "0xba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
        let upper = "0XBA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD";
        let bare = &canonical[2..];
        for input in [canonical, upper, bare] {
            assert_eq!(Fingerprint::parse(input).unwrap().to_string(), canonical);
        }
    }

    #[test]
    fn parse_rejects_bad_length_and_digits() {
        assert!(Fingerprint::parse("0x1234").is_err());
        let bad = format!("0x{}zz", "0".repeat(62));
        let err = Fingerprint::parse(&bad).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn serde_uses_canonical_string() {
        let fp = fingerprint_of_bytes(b"serde");
        let encoded = serde_json::to_string(&fp).unwrap();
        assert_eq!(encoded, format!("\"{fp}\""));
        let decoded: Fingerprint = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, fp);
    }
}
