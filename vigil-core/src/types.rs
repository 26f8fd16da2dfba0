//! Core data types shared across the triage pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::error::ValidationError;

/// Alert severity as reported by the upstream detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOW" => Ok(Severity::Low),
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(ValidationError::Field {
                field: "severity".into(),
                reason: format!("unknown severity '{other}'"),
            }),
        }
    }
}

/// A security alert delivered by ingestion. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(alias = "alert_id")]
    pub id: String,
    pub source: String,
    pub severity: Severity,
    pub summary: String,
    #[serde(alias = "raw_payload_hash")]
    pub payload_hash: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl Alert {
    /// Build and validate an alert stamped with the current time.
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        severity: Severity,
        summary: impl Into<String>,
        payload_hash: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let alert = Self {
            id: id.into(),
            source: source.into(),
            severity,
            summary: summary.into(),
            payload_hash: payload_hash.into(),
            timestamp: Utc::now(),
            details: Map::new(),
        };
        alert.validate()?;
        Ok(alert)
    }

    /// Build an alert from a raw ingestion body.
    ///
    /// The payload hash is taken over the exact raw bytes, `summary` and
    /// `source` are sanitized, and the result is validated. Any
    /// `payload_hash` carried in the body is overwritten.
    pub fn from_raw_json(raw: &str) -> Result<Self, ValidationError> {
        let payload_hash = compute_payload_hash(raw);
        let mut fields: Map<String, Value> =
            serde_json::from_str(raw).map_err(|e| ValidationError::MalformedJson {
                message: format!("alert body: {e}"),
            })?;

        for key in ["summary", "source"] {
            if let Some(Value::String(text)) = fields.get_mut(key) {
                *text = sanitize_input(text);
            }
        }
        fields.remove("raw_payload_hash");
        fields.insert("payload_hash".to_string(), Value::String(payload_hash));

        let alert: Alert = serde_json::from_value(Value::Object(fields)).map_err(|e| {
            ValidationError::MalformedJson {
                message: format!("alert body: {e}"),
            }
        })?;
        alert.validate()?;
        Ok(alert)
    }

    /// Check the ingestion constraints on every field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_length("id", &self.id, 64)?;
        check_length("source", &self.source, 64)?;
        check_length("summary", &self.summary, 512)?;
        if self.summary.chars().any(|c| c.is_ascii_control()) {
            return Err(field_error("summary", "contains control characters"));
        }
        if !is_payload_hash(&self.payload_hash) {
            return Err(field_error(
                "payload_hash",
                "expected 'sha256:' followed by 64 lowercase hex digits",
            ));
        }
        Ok(())
    }
}

fn field_error(field: &str, reason: &str) -> ValidationError {
    ValidationError::Field {
        field: field.into(),
        reason: reason.into(),
    }
}

fn check_length(field: &str, value: &str, max: usize) -> Result<(), ValidationError> {
    let len = value.chars().count();
    if len == 0 || len > max {
        return Err(field_error(field, &format!("length must be 1..={max}, got {len}")));
    }
    Ok(())
}

fn is_payload_hash(value: &str) -> bool {
    value.strip_prefix("sha256:").is_some_and(|hex| {
        hex.len() == 64 && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    })
}

/// Hash raw bytes into the `sha256:<hex>` form used for payloads and prompts.
pub fn compute_payload_hash(raw: impl AsRef<[u8]>) -> String {
    let digest = Sha256::digest(raw.as_ref());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("sha256:{hex}")
}

static TAG_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"<[^>]*>").ok());

/// Normalize untrusted text before it reaches a prompt.
///
/// Drops control characters other than newline and tab, removes complete
/// `<...>` tags (a lone `<` is kept), decodes common HTML entities, and
/// collapses runs of whitespace.
pub fn sanitize_input(text: &str) -> String {
    let printable: String = text
        .chars()
        .filter(|&c| c == '\n' || c == '\t' || !c.is_control())
        .collect();
    let stripped = match TAG_PATTERN.as_ref() {
        Some(tags) => tags.replace_all(&printable, ""),
        None => printable.as_str().into(),
    };
    // &amp; last so "&amp;lt;" decodes once, to "&lt;"
    let decoded = stripped
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A retrieved document chunk with its fused relevance score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    pub doc_id: String,
    pub content: String,
    pub metadata: BTreeMap<String, Value>,
    pub fusion_score: f64,
}

impl ContextItem {
    /// The `source` metadata entry, if present.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(|v| v.as_str())
    }
}

/// Outcome of a verification layer or of the whole gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
    Pending,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Pass => write!(f, "PASS"),
            Verdict::Fail => write!(f, "FAIL"),
            Verdict::Pending => write!(f, "PENDING"),
        }
    }
}

/// Where a remediation step came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub doc_id: String,
    pub chunk_id: String,
    pub score: f64,
}

/// An LLM-authored remediation plan awaiting (or carrying) a policy verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Remediation {
    pub action_id: String,
    pub alert_id: String,
    pub title: String,
    pub steps: Vec<String>,
    pub confidence: f64,
    pub provenance: Vec<Provenance>,
    pub model_version: String,
    pub prompt_hash: String,
    pub policy_verdict: Verdict,
    pub timestamp: DateTime<Utc>,
}

impl Remediation {
    /// Title followed by each step on its own line.
    pub fn plan_text(&self) -> String {
        let mut text = self.title.clone();
        for step in &self.steps {
            text.push('\n');
            text.push_str(step);
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_hash() -> String {
        compute_payload_hash(b"payload")
    }

    #[test]
    fn test_alert_new_valid() {
        let alert = Alert::new("a-1", "edr", Severity::High, "brute force", valid_hash()).unwrap();
        assert_eq!(alert.severity, Severity::High);
        assert!(alert.details.is_empty());
    }

    #[test]
    fn test_alert_rejects_long_id() {
        let err = Alert::new("x".repeat(65), "edr", Severity::Low, "s", valid_hash()).unwrap_err();
        assert!(matches!(err, ValidationError::Field { ref field, .. } if field == "id"));
    }

    #[test]
    fn test_alert_rejects_empty_summary() {
        assert!(Alert::new("a", "edr", Severity::Low, "", valid_hash()).is_err());
    }

    #[test]
    fn test_alert_rejects_control_chars() {
        let err = Alert::new("a", "edr", Severity::Low, "bad\u{7}bell", valid_hash()).unwrap_err();
        assert!(err.to_string().contains("control characters"));
    }

    #[test]
    fn test_alert_rejects_bad_hash() {
        assert!(Alert::new("a", "edr", Severity::Low, "s", "md5:abc").is_err());
        let upper = format!("sha256:{}", "A".repeat(64));
        assert!(Alert::new("a", "edr", Severity::Low, "s", upper).is_err());
    }

    #[test]
    fn test_alert_deserializes_ingestion_field_names() {
        let json = serde_json::json!({
            "alert_id": "a-9",
            "source": "siem",
            "severity": "CRITICAL",
            "summary": "ransomware note",
            "raw_payload_hash": valid_hash(),
            "timestamp": "2026-01-01T00:00:00Z",
            "details": {"host": "db-1"}
        });
        let alert: Alert = serde_json::from_value(json).unwrap();
        assert_eq!(alert.id, "a-9");
        assert_eq!(alert.severity, Severity::Critical);
        assert!(alert.validate().is_ok());
    }

    #[test]
    fn test_compute_payload_hash() {
        assert_eq!(
            compute_payload_hash(""),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert!(is_payload_hash(&compute_payload_hash("abc")));
    }

    #[test]
    fn test_sanitize_input() {
        assert_eq!(
            sanitize_input("  <b>Failed</b>   login\u{0}\u{1b} from\t10.0.0.1 "),
            "Failed login from 10.0.0.1"
        );
        assert_eq!(sanitize_input("<script>alert(1)</script>"), "alert(1)");
    }

    #[test]
    fn test_from_raw_json_hashes_and_sanitizes() {
        let raw = r#"{"id": "a-9", "source": " <i>siem</i> ", "severity": "HIGH", "summary": "Failed logins &lt; 5 <b>per</b>\u0007 minute", "payload_hash": "sha256:bogus"}"#;
        let alert = Alert::from_raw_json(raw).unwrap();
        assert_eq!(alert.payload_hash, compute_payload_hash(raw));
        assert_eq!(alert.source, "siem");
        assert_eq!(alert.summary, "Failed logins < 5 per minute");
    }

    #[test]
    fn test_from_raw_json_rejects_bad_bodies() {
        assert!(matches!(
            Alert::from_raw_json("not json"),
            Err(ValidationError::MalformedJson { .. })
        ));
        let missing_summary = r#"{"id": "a", "source": "s", "severity": "LOW"}"#;
        assert!(Alert::from_raw_json(missing_summary).is_err());
        let blank_summary = r#"{"id": "a", "source": "s", "severity": "LOW", "summary": "<b></b>"}"#;
        assert!(matches!(
            Alert::from_raw_json(blank_summary),
            Err(ValidationError::Field { .. })
        ));
    }

    #[test]
    fn test_sanitize_keeps_unclosed_angle_bracket() {
        assert_eq!(
            sanitize_input("Failed logins < 5 per minute from 10.0.0.1"),
            "Failed logins < 5 per minute from 10.0.0.1"
        );
        assert_eq!(sanitize_input("a <b>bold</b> 3 < 4"), "a bold 3 < 4");
    }

    #[test]
    fn test_sanitize_decodes_entities_once() {
        assert_eq!(sanitize_input("A &amp; B &lt;ok&gt;"), "A & B <ok>");
        assert_eq!(sanitize_input("&amp;lt;"), "&lt;");
    }

    #[test]
    fn test_severity_parse_and_display() {
        assert_eq!("HIGH".parse::<Severity>().unwrap(), Severity::High);
        assert!("high".parse::<Severity>().is_err());
        assert_eq!(Severity::Medium.to_string(), "MEDIUM");
    }

    #[test]
    fn test_plan_text() {
        let r = Remediation {
            action_id: "act".into(),
            alert_id: "a".into(),
            title: "Contain".into(),
            steps: vec!["Isolate host".into(), "Reset password".into()],
            confidence: 0.8,
            provenance: vec![],
            model_version: "stub-v1".into(),
            prompt_hash: compute_payload_hash("p"),
            policy_verdict: Verdict::Pending,
            timestamp: Utc::now(),
        };
        assert_eq!(r.plan_text(), "Contain\nIsolate host\nReset password");
    }
}
