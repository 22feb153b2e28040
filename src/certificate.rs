//! Certificates and the stateless renderer for anything that can describe its fields.

use crate::address::Address;
use crate::digest::Fingerprint;
use crate::error::{ProveItError, Result};
use crate::network::NetworkIdentity;
use crate::service::{RegistrationRecord, VerificationRecord};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// Schema tag of certificate artifacts.
pub const CERTIFICATE_SCHEMA: &str = "proveit.certificate.v1";

/// One labelled field of a renderable record.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldEntry {
    /// JSON key.
    pub key: &'static str,
    /// Human-readable label for text output.
    pub label: &'static str,
    /// Typed value; `None` fields are omitted from every output.
    pub value: Option<Value>,
}

impl FieldEntry {
    /// A field that is always present.
    pub fn new(key: &'static str, label: &'static str, value: impl Into<Value>) -> Self {
        Self {
            key,
            label,
            value: Some(value.into()),
        }
    }

    /// A field that may be absent.
    pub fn optional<V: Into<Value>>(
        key: &'static str,
        label: &'static str,
        value: Option<V>,
    ) -> Self {
        Self {
            key,
            label,
            value: value.map(Into::into),
        }
    }
}

/// Capability the renderers work against.
pub trait DescribeFields {
    /// Schema tag written into JSON output.
    fn schema(&self) -> &'static str;
    /// Heading of the text rendering.
    fn title(&self) -> String;
    /// Ordered fields.
    fn describe_fields(&self) -> Vec<FieldEntry>;
    /// Free-text paragraphs appended to the text rendering.
    fn notes(&self) -> Vec<String> {
        Vec::new()
    }
}

/// ISO-8601 UTC with second precision, e.g. `2024-05-01T12:00:00Z`.
pub fn iso_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Evidence that a fingerprint was registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    /// Registered fingerprint.
    pub fingerprint: Fingerprint,
    /// Registering account.
    pub owner: Address,
    /// Block time of the registration.
    pub timestamp: DateTime<Utc>,
    /// Transaction id; empty when derived from a lookup.
    pub transaction_id: String,
    /// Network holding the registration.
    pub network: NetworkIdentity,
    /// Registrant metadata, if non-empty.
    pub metadata: Option<String>,
    /// Name of the certified file, if known.
    pub source_name: Option<String>,
}

impl Certificate {
    /// Certificate for a confirmed write.
    pub fn from_registration(record: &RegistrationRecord) -> Self {
        Self {
            fingerprint: record.fingerprint,
            owner: record.owner,
            timestamp: record.timestamp,
            transaction_id: record.transaction_id.clone(),
            network: record.network,
            metadata: non_empty(&record.metadata),
            source_name: None,
        }
    }

    /// Certificate for a lookup. Fails with a not-found error when nothing was
    /// registered, including the placeholder record of a missing file.
    pub fn from_verification(record: &VerificationRecord) -> Result<Self> {
        let fingerprint = record
            .fingerprint
            .ok_or_else(|| ProveItError::NothingToCertify("record has no fingerprint".into()))?;
        let registration = record
            .registration
            .as_ref()
            .ok_or(ProveItError::NotRegistered(fingerprint))?;
        Ok(Self {
            fingerprint,
            owner: registration.owner,
            timestamp: registration.timestamp,
            transaction_id: String::new(),
            network: registration.network,
            metadata: non_empty(&registration.metadata),
            source_name: None,
        })
    }

    /// Attaches the certified file's name.
    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = Some(name.into());
        self
    }

    /// Command a reader can run to check this certificate.
    pub fn verify_command(&self) -> String {
        format!(
            "proveit verify-hash {} --network {}",
            self.fingerprint, self.network
        )
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

impl DescribeFields for Certificate {
    fn schema(&self) -> &'static str {
        CERTIFICATE_SCHEMA
    }

    fn title(&self) -> String {
        "Certificate of Registration".to_string()
    }

    fn describe_fields(&self) -> Vec<FieldEntry> {
        vec![
            FieldEntry::new("hash", "Hash (SHA-256)", self.fingerprint.to_string()),
            FieldEntry::optional("file_name", "File Name", self.source_name.clone()),
            FieldEntry::new("owner", "Owner Address", self.owner.to_string()),
            FieldEntry::new("timestamp", "Registration Date", iso_timestamp(&self.timestamp)),
            FieldEntry::new("network", "Network", self.network.as_str()),
            FieldEntry::new("tx_hash", "Transaction Hash", self.transaction_id.clone()),
            FieldEntry::optional("metadata", "Metadata", self.metadata.clone()),
        ]
    }

    fn notes(&self) -> Vec<String> {
        vec![
            "This certificate records that the content hash above was registered on the \
             ledger at the stated time, which is evidence the content existed at that point."
                .to_string(),
            format!("To verify this registration, run: {}", self.verify_command()),
            "DISCLAIMER: This certificate is evidence of existence at a specific time. It is \
             not a copyright registration and grants no legal protection by itself."
                .to_string(),
        ]
    }
}

/// Structured rendering: schema tag followed by every present field.
pub fn render_json(record: &dyn DescribeFields) -> Value {
    let mut out = Map::new();
    out.insert("schema".into(), Value::String(record.schema().to_string()));
    for field in record.describe_fields() {
        if let Some(value) = field.value {
            out.insert(field.key.into(), value);
        }
    }
    Value::Object(out)
}

/// Printable rendering: title, aligned field table, notes.
pub fn render_text(record: &dyn DescribeFields) -> String {
    let title = record.title();
    let fields: Vec<(String, String)> = record
        .describe_fields()
        .into_iter()
        .filter_map(|f| f.value.map(|v| (format!("{}:", f.label), plain(v))))
        .collect();
    let width = fields.iter().map(|(label, _)| label.len()).max().unwrap_or(0);

    let mut out = String::new();
    out.push_str(&title);
    out.push('\n');
    out.push_str(&"=".repeat(title.len()));
    out.push_str("\n\n");
    for (label, value) in &fields {
        out.push_str(&format!("{label:<width$}  {value}\n"));
    }
    for note in record.notes() {
        out.push('\n');
        out.push_str(&note);
        out.push('\n');
    }
    out
}

fn plain(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

/// Writes `record` to `path`: pretty JSON for `.json`, text otherwise. A path
/// without an extension gets `.txt`. Returns the path actually written.
pub fn write_record(record: &dyn DescribeFields, path: &Path) -> Result<PathBuf> {
    let target = match path.extension() {
        None => path.with_extension("txt"),
        Some(_) => path.to_path_buf(),
    };
    let is_json = target
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let payload = if is_json {
        let mut text = serde_json::to_string_pretty(&render_json(record))?;
        text.push('\n');
        text
    } else {
        render_text(record)
    };
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(&target, payload)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::{render_json, render_text, write_record, Certificate, CERTIFICATE_SCHEMA};
    use crate::address::Address;
    use crate::digest::fingerprint_of_bytes;
    use crate::error::ErrorKind;
    use crate::network::NetworkIdentity;
    use crate::service::{Registration, RegistrationRecord, VerificationRecord};
    use chrono::{TimeZone, Utc};
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn owner() -> Address {
        Address::parse("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266").unwrap()
    }

    fn registration() -> RegistrationRecord {
        RegistrationRecord {
            fingerprint: fingerprint_of_bytes(b"cert"),
            transaction_id: format!("0x{}", "cd".repeat(32)),
            owner: owner(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            block_number: 7,
            network: NetworkIdentity::Polygon,
            metadata: String::new(),
        }
    }

    #[test]
    fn json_has_schema_and_omits_absent_fields() {
        let cert = Certificate::from_registration(&registration());
        let json = render_json(&cert);
        assert_eq!(json["schema"], CERTIFICATE_SCHEMA);
        assert_eq!(json["hash"], fingerprint_of_bytes(b"cert").to_string());
        assert_eq!(json["owner"], "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
        assert_eq!(json["timestamp"], "2024-05-01T12:00:00Z");
        assert_eq!(json["network"], "polygon");
        assert!(json.get("metadata").is_none());
        assert!(json.get("file_name").is_none());

        let named = cert.with_source_name("report.pdf");
        assert_eq!(render_json(&named)["file_name"], "report.pdf");
    }

    #[test]
    fn text_contains_title_fields_and_verify_command() {
        let cert = Certificate::from_registration(&registration());
        let text = render_text(&cert);
        assert!(text.starts_with("Certificate of Registration\n==="));
        assert!(text.contains("Owner Address:"));
        assert!(text.contains("2024-05-01T12:00:00Z"));
        assert!(text.contains(&format!(
            "proveit verify-hash {} --network polygon",
            cert.fingerprint
        )));
        assert!(!text.contains("Metadata:"));
    }

    #[test]
    fn lookup_certificates_require_a_registration() {
        let fp = fingerprint_of_bytes(b"absent");
        let unregistered = VerificationRecord {
            fingerprint: Some(fp),
            registration: None,
        };
        let err = Certificate::from_verification(&unregistered).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let registered = VerificationRecord {
            fingerprint: Some(fp),
            registration: Some(Registration {
                owner: owner(),
                timestamp: Utc.with_ymd_and_hms(2023, 1, 2, 3, 4, 5).unwrap(),
                metadata: "m".into(),
                network: NetworkIdentity::Localhost,
            }),
        };
        let cert = Certificate::from_verification(&registered).unwrap();
        assert!(cert.transaction_id.is_empty());
        assert_eq!(cert.metadata.as_deref(), Some("m"));
    }

    #[test]
    fn missing_file_placeholder_is_not_found() {
        let err = Certificate::from_verification(&VerificationRecord::missing()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn text_renders_typed_values_without_quotes() {
        let record = VerificationRecord {
            fingerprint: Some(fingerprint_of_bytes(b"absent")),
            registration: None,
        };
        let text = render_text(&record);
        assert!(text.contains("Registered:  false"));
        assert!(!text.contains("\"false\""));
    }

    #[test]
    fn write_record_picks_format_from_extension() {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("proveit_cert_{unique}"));
        let cert = Certificate::from_registration(&registration());

        let json_path = write_record(&cert, &dir.join("out.json")).unwrap();
        let parsed: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(parsed["tx_hash"], cert.transaction_id);

        let bare = write_record(&cert, &dir.join("out")).unwrap();
        assert_eq!(bare, dir.join("out.txt"));
        assert!(fs::read_to_string(bare).unwrap().contains("Certificate of Registration"));
        let _ = fs::remove_dir_all(dir);
    }
}
