//! Registration and verification service over a [`LedgerClient`].

use crate::address::Address;
use crate::certificate::{iso_timestamp, Certificate, DescribeFields, FieldEntry};
use crate::config::ClientOptions;
use crate::digest::{fingerprint_of_bytes, fingerprint_of_file, Fingerprint};
use crate::error::{ProveItError, Result};
use crate::ledger::{LedgerClient, RawLookupResult, RawTxResult};
use crate::network::{resolve, NetworkIdentity};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// What to fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    /// A file on disk, streamed through the hasher.
    File(PathBuf),
    /// An in-memory buffer.
    Content(Vec<u8>),
    /// A precomputed digest in any accepted hex form.
    Hash(String),
}

impl Subject {
    /// Fingerprint of the subject; pure apart from reading a file.
    pub fn fingerprint(&self) -> Result<Fingerprint> {
        match self {
            Subject::File(path) => fingerprint_of_file(path),
            Subject::Content(bytes) => Ok(fingerprint_of_bytes(bytes)),
            Subject::Hash(hash) => Fingerprint::parse(hash),
        }
    }
}

/// A confirmed registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRecord {
    /// Registered fingerprint.
    pub fingerprint: Fingerprint,
    /// Transaction id of the write.
    pub transaction_id: String,
    /// Registering account.
    pub owner: Address,
    /// Block time of the confirming block.
    pub timestamp: DateTime<Utc>,
    /// Confirming block height.
    pub block_number: u64,
    /// Network the write landed on.
    pub network: NetworkIdentity,
    /// Registrant metadata; may be empty.
    pub metadata: String,
}

/// Stored registration as seen by a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Registering account.
    pub owner: Address,
    /// Time recorded by the contract.
    pub timestamp: DateTime<Utc>,
    /// Registrant metadata; may be empty.
    pub metadata: String,
    /// Network that answered the lookup.
    pub network: NetworkIdentity,
}

/// Lookup result.
///
/// `fingerprint` is `None` only for the batch placeholder of a missing file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRecord {
    /// Fingerprint that was looked up.
    pub fingerprint: Option<Fingerprint>,
    /// Present iff the fingerprint is registered.
    pub registration: Option<Registration>,
}

impl VerificationRecord {
    /// Placeholder for a batch entry whose file does not exist.
    pub fn missing() -> Self {
        Self {
            fingerprint: None,
            registration: None,
        }
    }

    /// True when a registration exists.
    pub fn is_registered(&self) -> bool {
        self.registration.is_some()
    }

    /// Canonical fingerprint, or `""` for the placeholder.
    pub fn fingerprint_string(&self) -> String {
        self.fingerprint.map(|fp| fp.to_string()).unwrap_or_default()
    }
}

/// Per-item batch result that keeps missing files distinguishable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The file was hashed and looked up.
    Verified(VerificationRecord),
    /// The file does not exist.
    Missing(PathBuf),
}

impl BatchOutcome {
    /// Collapses into the lenient record form.
    pub fn into_record(self) -> VerificationRecord {
        match self {
            BatchOutcome::Verified(record) => record,
            BatchOutcome::Missing(_) => VerificationRecord::missing(),
        }
    }
}

/// Input to [`ProveIt::make_certificate`].
#[derive(Debug, Clone, Copy)]
pub enum CertificateSource<'a> {
    /// A confirmed write.
    Registration(&'a RegistrationRecord),
    /// A lookup result; must be registered.
    Verification(&'a VerificationRecord),
    /// A raw digest, verified first.
    Hash(&'a str),
}

fn block_time(seconds: u64) -> Result<DateTime<Utc>> {
    i64::try_from(seconds)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .ok_or_else(|| ProveItError::protocol(format!("timestamp {seconds} out of range")))
}

/// Entry point for registering and verifying content.
#[derive(Debug)]
pub struct ProveIt {
    client: LedgerClient,
}

impl ProveIt {
    /// Wraps an already connected client.
    pub fn new(client: LedgerClient) -> Self {
        Self { client }
    }

    /// Resolves the endpoint for `options.network` and connects.
    pub fn open(options: ClientOptions) -> Result<Self> {
        let endpoint = resolve(options.network, &options.overrides)?;
        let client =
            LedgerClient::connect(options.network, &endpoint, options.signer, options.settings)?;
        Ok(Self::new(client))
    }

    /// Underlying ledger client.
    pub fn client(&self) -> &LedgerClient {
        &self.client
    }

    /// Network this service talks to.
    pub fn network(&self) -> NetworkIdentity {
        self.client.network()
    }

    /// Fingerprints `subject` and registers it with `metadata`.
    pub fn register(&self, subject: &Subject, metadata: &str) -> Result<RegistrationRecord> {
        let fingerprint = subject.fingerprint()?;
        let raw = self
            .client
            .submit_registration(&fingerprint.to_string(), metadata)?;
        Self::registration_record(raw)
    }

    fn registration_record(raw: RawTxResult) -> Result<RegistrationRecord> {
        Ok(RegistrationRecord {
            fingerprint: raw.fingerprint,
            transaction_id: raw.tx_id,
            owner: raw.owner,
            timestamp: block_time(raw.timestamp)?,
            block_number: raw.block_number,
            network: raw.network,
            metadata: raw.metadata,
        })
    }

    /// Fingerprints `subject` and looks it up. Only invalid input fails.
    pub fn verify(&self, subject: &Subject) -> Result<VerificationRecord> {
        let fingerprint = subject.fingerprint()?;
        let raw = self.client.lookup(&fingerprint.to_string())?;
        Ok(self.verification_record(raw))
    }

    fn verification_record(&self, raw: RawLookupResult) -> VerificationRecord {
        let fingerprint = raw.fingerprint;
        let registration = raw.registration.and_then(|reg| match block_time(reg.timestamp) {
            Ok(timestamp) => Some(Registration {
                owner: reg.owner,
                timestamp,
                metadata: reg.metadata,
                network: self.network(),
            }),
            Err(err) => {
                warn!(fingerprint = %fingerprint, error = %err, "unusable registration timestamp");
                None
            }
        });
        VerificationRecord {
            fingerprint: Some(fingerprint),
            registration,
        }
    }

    /// Verifies each path in order, reporting missing files as [`BatchOutcome::Missing`].
    /// Any other error aborts the batch.
    pub fn batch_verify_detailed<P: AsRef<Path>>(&self, paths: &[P]) -> Result<Vec<BatchOutcome>> {
        let mut out = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            match self.verify(&Subject::File(path.to_path_buf())) {
                Ok(record) => out.push(BatchOutcome::Verified(record)),
                Err(ProveItError::MissingFile(missing)) => {
                    debug!(path = %missing.display(), "batch entry missing");
                    out.push(BatchOutcome::Missing(missing));
                }
                Err(err) => return Err(err),
            }
        }
        Ok(out)
    }

    /// Lenient batch: missing files become unregistered placeholders with an empty fingerprint.
    pub fn batch_verify<P: AsRef<Path>>(&self, paths: &[P]) -> Result<Vec<VerificationRecord>> {
        Ok(self
            .batch_verify_detailed(paths)?
            .into_iter()
            .map(BatchOutcome::into_record)
            .collect())
    }

    /// Derives a certificate; unregistered sources fail with `NotRegistered`.
    pub fn make_certificate(&self, source: CertificateSource<'_>) -> Result<Certificate> {
        match source {
            CertificateSource::Registration(record) => Ok(Certificate::from_registration(record)),
            CertificateSource::Verification(record) => Certificate::from_verification(record),
            CertificateSource::Hash(hash) => {
                let record = self.verify(&Subject::Hash(hash.to_string()))?;
                Certificate::from_verification(&record)
            }
        }
    }
}

impl DescribeFields for RegistrationRecord {
    fn schema(&self) -> &'static str {
        "proveit.registration.v1"
    }

    fn title(&self) -> String {
        "Registration Receipt".to_string()
    }

    fn describe_fields(&self) -> Vec<FieldEntry> {
        vec![
            FieldEntry::new("hash", "Hash", self.fingerprint.to_string()),
            FieldEntry::new("tx_hash", "Transaction", self.transaction_id.clone()),
            FieldEntry::new("owner", "Owner", self.owner.to_string()),
            FieldEntry::new("timestamp", "Timestamp", iso_timestamp(&self.timestamp)),
            FieldEntry::new("block_number", "Block", self.block_number),
            FieldEntry::new("network", "Network", self.network.as_str()),
            FieldEntry::optional(
                "metadata",
                "Metadata",
                (!self.metadata.is_empty()).then(|| self.metadata.clone()),
            ),
        ]
    }
}

impl DescribeFields for VerificationRecord {
    fn schema(&self) -> &'static str {
        "proveit.verification.v1"
    }

    fn title(&self) -> String {
        if self.is_registered() {
            "Registered".to_string()
        } else {
            "Not Registered".to_string()
        }
    }

    fn describe_fields(&self) -> Vec<FieldEntry> {
        let reg = self.registration.as_ref();
        vec![
            FieldEntry::new("hash", "Hash", self.fingerprint_string()),
            FieldEntry::new("is_registered", "Registered", self.is_registered()),
            FieldEntry::optional("owner", "Owner", reg.map(|r| r.owner.to_string())),
            FieldEntry::optional(
                "timestamp",
                "Timestamp",
                reg.map(|r| iso_timestamp(&r.timestamp)),
            ),
            FieldEntry::optional("network", "Network", reg.map(|r| r.network.as_str().to_string())),
            FieldEntry::optional(
                "metadata",
                "Metadata",
                reg.and_then(|r| (!r.metadata.is_empty()).then(|| r.metadata.clone())),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::{BatchOutcome, CertificateSource, ProveIt, Subject};
    use crate::certificate::render_json;
    use crate::devnet::DevnetChain;
    use crate::digest::fingerprint_of_bytes;
    use crate::error::ErrorKind;
    use crate::ledger::{ClientSettings, LedgerClient, SigningIdentity};
    use crate::network::NetworkIdentity;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn service(chain: &Arc<DevnetChain>, signer: Option<SigningIdentity>) -> ProveIt {
        let client = LedgerClient::with_transport(
            Arc::clone(chain),
            NetworkIdentity::Localhost,
            chain.contract(),
            signer,
            ClientSettings::default(),
        )
        .expect("devnet client");
        ProveIt::new(client)
    }

    fn writer(chain: &Arc<DevnetChain>) -> ProveIt {
        service(chain, Some(SigningIdentity::from_hex(KEY).unwrap()))
    }

    fn temp_dir(name: &str) -> PathBuf {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("proveit_service_{name}_{unique}"));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn register_then_verify_round_trip() {
        let chain = Arc::new(DevnetChain::default());
        let prove = writer(&chain);
        let subject = Subject::Content(b"manuscript v1".to_vec());
        let written = prove.register(&subject, "draft").unwrap();
        assert_eq!(written.fingerprint, fingerprint_of_bytes(b"manuscript v1"));
        assert_eq!(written.network, NetworkIdentity::Localhost);
        assert_eq!(written.transaction_id.len(), 66);
        let receipt = render_json(&written);
        assert_eq!(receipt["block_number"], 1);
        assert!(receipt["block_number"].is_u64());

        let found = prove.verify(&subject).unwrap();
        let reg = found.registration.clone().expect("registered");
        assert_eq!(found.fingerprint, Some(written.fingerprint));
        assert_eq!(reg.owner, written.owner);
        assert_eq!(reg.timestamp, written.timestamp);
        assert_eq!(reg.metadata, "draft");
        assert_eq!(render_json(&found)["is_registered"], true);

        let upper = written.fingerprint.to_string()[2..].to_ascii_uppercase();
        assert!(prove.verify(&Subject::Hash(upper)).unwrap().is_registered());
    }

    #[test]
    fn unregistered_content_verifies_as_absent() {
        let chain = Arc::new(DevnetChain::default());
        let record = service(&chain, None)
            .verify(&Subject::Content(b"never seen".to_vec()))
            .unwrap();
        assert!(!record.is_registered());
        assert_eq!(record.fingerprint, Some(fingerprint_of_bytes(b"never seen")));
        let json = render_json(&record);
        assert_eq!(json["is_registered"], false);
        assert!(json.get("owner").is_none());
    }

    #[test]
    fn duplicate_registration_is_a_contract_error() {
        let chain = Arc::new(DevnetChain::default());
        let prove = writer(&chain);
        let subject = Subject::Content(b"once".to_vec());
        prove.register(&subject, "").unwrap();
        let err = prove.register(&subject, "again").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Contract);
        assert!(err.to_string().contains("Hash already registered"));
        assert_eq!(chain.block_number(), 1);
    }

    #[test]
    fn read_only_service_cannot_write() {
        let chain = Arc::new(DevnetChain::default());
        let err = service(&chain, None)
            .register(&Subject::Content(b"x".to_vec()), "")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);
        assert_eq!(chain.block_number(), 0);
    }

    #[test]
    fn missing_file_is_invalid_input_for_single_calls() {
        let chain = Arc::new(DevnetChain::default());
        let missing = temp_dir("single").join("nope.bin");
        let err = writer(&chain)
            .verify(&Subject::File(missing))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn batch_preserves_order_and_marks_missing_files() {
        let chain = Arc::new(DevnetChain::default());
        let prove = writer(&chain);
        let dir = temp_dir("batch");
        let a = dir.join("a.txt");
        let b = dir.join("b.txt");
        let gone = dir.join("gone.txt");
        fs::write(&a, b"alpha").unwrap();
        fs::write(&b, b"beta").unwrap();
        prove.register(&Subject::File(a.clone()), "").unwrap();

        let paths = vec![a.clone(), gone.clone(), b.clone()];
        let records = prove.batch_verify(&paths).unwrap();
        assert_eq!(records.len(), 3);
        assert!(records[0].is_registered());
        assert_eq!(records[0].fingerprint, Some(fingerprint_of_bytes(b"alpha")));
        assert!(!records[1].is_registered());
        assert_eq!(records[1].fingerprint_string(), "");
        assert!(!records[2].is_registered());
        assert_eq!(records[2].fingerprint, Some(fingerprint_of_bytes(b"beta")));

        let detailed = prove.batch_verify_detailed(&paths).unwrap();
        assert_eq!(detailed[1], BatchOutcome::Missing(gone));
        assert!(matches!(&detailed[2], BatchOutcome::Verified(r) if !r.is_registered()));

        let with_dir = vec![a, dir.clone()];
        assert_eq!(
            prove.batch_verify(&with_dir).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn certificates_from_every_source() {
        let chain = Arc::new(DevnetChain::default());
        let prove = writer(&chain);
        let written = prove
            .register(&Subject::Content(b"certify me".to_vec()), "v2")
            .unwrap();

        let from_write = prove
            .make_certificate(CertificateSource::Registration(&written))
            .unwrap();
        assert_eq!(from_write.transaction_id, written.transaction_id);
        assert_eq!(from_write.metadata.as_deref(), Some("v2"));

        let hash = written.fingerprint.to_string();
        let from_hash = prove.make_certificate(CertificateSource::Hash(&hash)).unwrap();
        assert_eq!(from_hash.owner, written.owner);
        assert_eq!(from_hash.timestamp, written.timestamp);
        assert!(from_hash.transaction_id.is_empty());

        let unknown = fingerprint_of_bytes(b"unknown").to_string();
        let err = prove
            .make_certificate(CertificateSource::Hash(&unknown))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let bad = prove.make_certificate(CertificateSource::Hash("0x12")).unwrap_err();
        assert_eq!(bad.kind(), ErrorKind::InvalidInput);
    }
}
