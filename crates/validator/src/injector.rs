//! Synthetic alert injection against the live ingest surface.

use rand::Rng;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::debug;

/// HTTP client for the alert-ingest endpoint.
#[derive(Debug, Clone)]
pub struct Injector {
    ingest_url: String,
    client: reqwest::Client,
}

/// Result of one injection.
#[derive(Debug, Clone)]
pub struct InjectOutcome {
    pub alert_id: String,
    pub status: String,
    pub latency_ms: u64,
    pub response: Value,
}

impl Injector {
    pub fn new(ingest_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            ingest_url: ingest_url.to_string(),
            client,
        }
    }

    /// A ransomware-shaped synthetic alert. Returns the payload and the
    /// synthetic file hash the forensic chain is expected to pick up.
    pub fn synthetic_alert() -> (Value, String) {
        let mut rng = rand::thread_rng();
        let file_hash: String = (0..64)
            .map(|_| char::from_digit(rng.gen_range(0..16), 16).unwrap_or('0'))
            .collect();
        let host_id: u16 = rng.gen_range(1..1000);

        let payload = json!({
            "source": "global-validator",
            "alert_type": "synthetic_ransomware",
            "target": format!("validation-host-{host_id}"),
            "severity": "high",
            "metadata": {
                "note": "synthetic validation alert mass file encryption detected",
                "file_hash_sha256": file_hash,
                "entropy": 7.9,
                "synthetic": true,
            },
        });
        (payload, file_hash)
    }

    /// POST the alert, returning the assigned id and round-trip latency.
    pub async fn inject_alert(&self, payload: &Value) -> anyhow::Result<InjectOutcome> {
        let started = Instant::now();
        let response = self
            .client
            .post(&self.ingest_url)
            .json(payload)
            .send()
            .await?;
        let latency_ms = started.elapsed().as_millis() as u64;

        let status_code = response.status();
        let body: Value = response.json().await?;
        if !status_code.is_success() {
            anyhow::bail!("ingest returned {status_code}: {body}");
        }

        let alert_id = body
            .get("alert_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("ingest response missing alert_id: {body}"))?
            .to_string();
        let status = body
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();

        debug!(alert_id = %alert_id, latency_ms, status = %status, "synthetic alert injected");
        Ok(InjectOutcome {
            alert_id,
            status,
            latency_ms,
            response: body,
        })
    }
}
