//! Canonical alert shape and boundary normalisation.

use crate::rules::Severity;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Raw ingress payload, as posted to `/ingest`.
///
/// `severity` and `timestamp` are free-form strings at the boundary;
/// normalisation maps them onto the typed record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertSubmission {
    pub source: String,
    pub alert_type: String,
    pub target: String,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Normalised alert with its server-assigned identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: Uuid,
    pub source: String,
    pub alert_type: String,
    pub target: String,
    pub severity: Severity,
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Producer timestamp when supplied, otherwise the accept time.
    pub timestamp: String,
    pub received_at: String,
}

impl Alert {
    /// Accept a submission: assign the id, default and normalise severity,
    /// stamp receive time in RFC 3339 UTC.
    pub fn accept(submission: AlertSubmission) -> Self {
        let received_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let severity = submission
            .severity
            .as_deref()
            .map(Severity::parse_lenient)
            .unwrap_or_default();
        Self {
            alert_id: Uuid::new_v4(),
            source: submission.source,
            alert_type: submission.alert_type,
            target: submission.target,
            severity,
            metadata: submission.metadata,
            timestamp: submission.timestamp.unwrap_or_else(|| received_at.clone()),
            received_at,
        }
    }

    /// Concatenated text fields feeding the fuzzy-dedup SimHash.
    pub fn dedup_text(&self) -> String {
        let mut parts = vec![
            self.source.clone(),
            self.alert_type.clone(),
            self.target.clone(),
        ];
        for value in self.metadata.values() {
            if let serde_json::Value::String(s) = value {
                parts.push(s.clone());
            }
        }
        parts.join(" ")
    }
}
