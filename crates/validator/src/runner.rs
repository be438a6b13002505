//! Scenario step execution with timeouts, retries and latency capture.
//!
//! The runner treats step bodies as opaque: it enforces the per-step
//! timeout, retries failures with exponential backoff (base 1 s, cap 10 s)
//! and records status, latency and details. Steps pass state forward
//! through a shared string-keyed context.

use crate::scenario::StepSpec;
use crate::ValidatorError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(10);

/// Opaque state handed from step to step
/// (`alert_id -> incident_id -> evidence_id`).
pub type StepContext = BTreeMap<String, String>;

/// One executable scenario step.
#[async_trait]
pub trait ScenarioStep: Send + Sync {
    fn spec(&self) -> &StepSpec;

    /// Run the step body once. Errors are retried per the step's budget.
    async fn run(&self, ctx: &mut StepContext) -> anyhow::Result<serde_json::Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepStatus {
    Passed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Passed,
    Failed,
}

/// Recorded outcome of one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub status: StepStatus,
    pub latency_ms: u64,
    pub attempts: u32,
    pub details: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-run metric vector consumed by the health scorer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunMetrics {
    pub api_latency_avg: f64,
    pub api_latency_max: f64,
    pub error_count: f64,
    pub queue_depth: f64,
    pub total_steps: f64,
    pub success_rate: f64,
}

impl RunMetrics {
    /// Derive the metric vector from recorded step results.
    pub fn from_steps(steps: &[StepResult]) -> Self {
        let total = steps.len() as f64;
        let failed = steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .count() as f64;
        let latencies: Vec<f64> = steps.iter().map(|s| s.latency_ms as f64).collect();
        let latency_sum: f64 = latencies.iter().sum();
        let latency_max = latencies.iter().cloned().fold(0.0f64, f64::max);

        Self {
            api_latency_avg: if total > 0.0 { latency_sum / total } else { 0.0 },
            api_latency_max: latency_max,
            error_count: failed,
            queue_depth: 0.0,
            total_steps: total,
            success_rate: if total > 0.0 { (total - failed) / total } else { 1.0 },
        }
    }
}

/// Paths of the attested artifacts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunArtifacts {
    pub pdf_path: Option<String>,
    pub manifest_path: Option<String>,
}

/// The complete validation-run document (persisted as
/// `runs/<run_id>_run.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub scenario_id: String,
    pub scenario_name: String,
    pub status: RunStatus,
    pub start_time: String,
    pub end_time: String,
    pub steps: Vec<StepResult>,
    pub metrics: RunMetrics,
    pub health: crate::health::HealthReport,
    #[serde(default)]
    pub artifacts: RunArtifacts,
    /// Ledger chain hash binding this run, set during attestation.
    #[serde(default)]
    pub entry_hash: Option<String>,
}

/// Execute steps in order. A step that exhausts its retries is recorded as
/// FAILED and execution continues so the run document captures every step;
/// the scenario as a whole passes iff every step passed.
pub async fn run_steps(
    steps: &[Box<dyn ScenarioStep>],
    ctx: &mut StepContext,
) -> Vec<StepResult> {
    let mut results = Vec::with_capacity(steps.len());

    for step in steps {
        let spec = step.spec();
        let mut attempts = 0u32;
        let mut backoff = BACKOFF_BASE;
        let result = loop {
            attempts += 1;
            let started = Instant::now();
            let outcome = tokio::time::timeout(spec.timeout, step.run(ctx)).await;
            let latency_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(Ok(details)) => {
                    info!(step = %spec.name, latency_ms, attempts, "step passed");
                    break StepResult {
                        name: spec.name.clone(),
                        status: StepStatus::Passed,
                        latency_ms,
                        attempts,
                        details,
                        error: None,
                    };
                }
                Ok(Err(e)) if attempts <= spec.retries => {
                    warn!(step = %spec.name, attempt = attempts, error = %e, "step failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(BACKOFF_CAP);
                }
                Ok(Err(e)) => {
                    warn!(step = %spec.name, attempts, error = %e, "step failed");
                    break StepResult {
                        name: spec.name.clone(),
                        status: StepStatus::Failed,
                        latency_ms,
                        attempts,
                        details: serde_json::Value::Null,
                        error: Some(e.to_string()),
                    };
                }
                Err(_elapsed) => {
                    let timeout_error = ValidatorError::TimedOut {
                        what: spec.name.clone(),
                        timeout_secs: spec.timeout.as_secs(),
                    };
                    if attempts <= spec.retries {
                        warn!(step = %spec.name, attempt = attempts, "step timed out, retrying");
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(BACKOFF_CAP);
                    } else {
                        warn!(step = %spec.name, attempts, "step timed out");
                        break StepResult {
                            name: spec.name.clone(),
                            status: StepStatus::Failed,
                            latency_ms,
                            attempts,
                            details: serde_json::Value::Null,
                            error: Some(timeout_error.to_string()),
                        };
                    }
                }
            }
        };
        results.push(result);
    }
    results
}
