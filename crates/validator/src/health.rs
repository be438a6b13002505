//! Run health scoring.
//!
//! A pre-trained linear model (weights, bias, per-feature means and scales)
//! scores the run metric vector into [0, 1]; contributions are exact for
//! the linear case: `w_i * (x_i - mean_i) / scale_i`. The model is loaded
//! from a verified artifact and hot-swapped through the active-artifact
//! manager. With no model loaded, scoring degrades to a neutral 0.5 /
//! healthy verdict with a warning so bootstrap runs can still complete.

use crate::runner::RunMetrics;
use ransomeye_registry::ActiveArtifact;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Feature order is part of the model artifact contract.
pub const FEATURE_NAMES: [&str; 6] = [
    "api_latency_avg",
    "api_latency_max",
    "error_count",
    "queue_depth",
    "total_steps",
    "success_rate",
];

const HEALTHY_THRESHOLD: f64 = 0.7;

/// Serialized model artifact (`model.json` inside a scorer bundle).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthModel {
    pub weights: [f64; 6],
    pub bias: f64,
    pub means: [f64; 6],
    pub scales: [f64; 6],
}

impl HealthModel {
    pub fn from_json_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn features(metrics: &RunMetrics) -> [f64; 6] {
        [
            metrics.api_latency_avg,
            metrics.api_latency_max,
            metrics.error_count,
            metrics.queue_depth,
            metrics.total_steps,
            metrics.success_rate,
        ]
    }

    /// Sigmoid-squashed score plus per-feature contributions.
    pub fn score(&self, metrics: &RunMetrics) -> (f64, BTreeMap<String, f64>) {
        let features = Self::features(metrics);
        let mut logit = self.bias;
        let mut contributions = BTreeMap::new();

        for i in 0..FEATURE_NAMES.len() {
            let scale = if self.scales[i].abs() < f64::EPSILON {
                1.0
            } else {
                self.scales[i]
            };
            let z = (features[i] - self.means[i]) / scale;
            let contribution = self.weights[i] * z;
            logit += contribution;
            contributions.insert(FEATURE_NAMES[i].to_string(), contribution);
        }

        let score = 1.0 / (1.0 + (-logit).exp());
        (score, contributions)
    }
}

/// Scoring outcome embedded in the run document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub health_score: f64,
    pub is_healthy: bool,
    pub shap: BTreeMap<String, f64>,
    pub explanation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_artifact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Stateless wrapper over the hot-swappable model slot.
#[derive(Clone)]
pub struct HealthScorer {
    model: Arc<ActiveArtifact<HealthModel>>,
}

impl HealthScorer {
    pub fn new(model: Arc<ActiveArtifact<HealthModel>>) -> Self {
        Self { model }
    }

    pub fn score(&self, metrics: &RunMetrics) -> HealthReport {
        match self.model.current() {
            Some(model) => {
                let (health_score, shap) = model.score(metrics);
                let is_healthy = health_score >= HEALTHY_THRESHOLD;
                debug!(health_score, is_healthy, "run scored");
                HealthReport {
                    health_score,
                    is_healthy,
                    shap,
                    explanation: explanation_text(metrics, health_score, is_healthy),
                    model_artifact: self.model.info().map(|i| i.artifact_id),
                    warning: None,
                }
            }
            None => {
                warn!("no scorer model loaded, using neutral bootstrap score");
                HealthReport {
                    health_score: 0.5,
                    is_healthy: true,
                    shap: BTreeMap::new(),
                    explanation: "No scorer model loaded; neutral bootstrap verdict.".to_string(),
                    model_artifact: None,
                    warning: Some("model_not_loaded".to_string()),
                }
            }
        }
    }
}

fn explanation_text(metrics: &RunMetrics, health_score: f64, is_healthy: bool) -> String {
    let mut findings = Vec::new();
    if metrics.api_latency_avg > 500.0 {
        findings.push("high average API latency (>500ms)".to_string());
    }
    if metrics.error_count > 0.0 {
        findings.push(format!("{} step errors", metrics.error_count as u64));
    }
    if metrics.success_rate < 0.8 {
        findings.push(format!(
            "low success rate ({:.1}%)",
            metrics.success_rate * 100.0
        ));
    }
    if findings.is_empty() {
        findings.push("all metrics within acceptable ranges".to_string());
    }

    let status = if is_healthy { "healthy" } else { "unhealthy" };
    format!(
        "Run is {status} (score: {health_score:.2}). {}.",
        findings.join("; ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ransomeye_registry::{ActiveEntry, ActiveInfo};

    fn test_model() -> HealthModel {
        // Positive weight on success rate, negative on errors and latency.
        HealthModel {
            weights: [-0.5, -0.3, -2.0, -0.1, 0.0, 3.0],
            bias: 1.5,
            means: [100.0, 200.0, 0.0, 0.0, 4.0, 1.0],
            scales: [100.0, 200.0, 1.0, 10.0, 4.0, 0.25],
        }
    }

    fn scorer_with_model() -> HealthScorer {
        let slot = Arc::new(ActiveArtifact::new());
        slot.swap(Some(ActiveEntry {
            value: Arc::new(test_model()),
            info: ActiveInfo {
                artifact_id: "model-1".to_string(),
                name: "validator-scorer".to_string(),
                version: "1".to_string(),
                manifest_hash: "hash".to_string(),
                activated_at: chrono::Utc::now(),
            },
        }));
        HealthScorer::new(slot)
    }

    fn clean_metrics() -> RunMetrics {
        RunMetrics {
            api_latency_avg: 80.0,
            api_latency_max: 150.0,
            error_count: 0.0,
            queue_depth: 0.0,
            total_steps: 4.0,
            success_rate: 1.0,
        }
    }

    #[test]
    fn test_clean_run_is_healthy() {
        let report = scorer_with_model().score(&clean_metrics());
        assert!(report.is_healthy, "score {}", report.health_score);
        assert!(report.health_score > 0.7);
        assert_eq!(report.model_artifact.as_deref(), Some("model-1"));
        assert!(report.warning.is_none());
        assert_eq!(report.shap.len(), FEATURE_NAMES.len());
    }

    #[test]
    fn test_failed_run_is_unhealthy() {
        let metrics = RunMetrics {
            api_latency_avg: 900.0,
            api_latency_max: 2_000.0,
            error_count: 3.0,
            queue_depth: 50.0,
            total_steps: 4.0,
            success_rate: 0.25,
        };
        let report = scorer_with_model().score(&metrics);
        assert!(!report.is_healthy, "score {}", report.health_score);
        assert!(report.explanation.contains("3 step errors"));
        assert!(report.explanation.contains("low success rate"));
        // Errors pull the score down.
        assert!(report.shap["error_count"] < 0.0);
    }

    #[test]
    fn test_bootstrap_without_model() {
        let scorer = HealthScorer::new(Arc::new(ActiveArtifact::new()));
        let report = scorer.score(&clean_metrics());
        assert_eq!(report.health_score, 0.5);
        assert!(report.is_healthy);
        assert_eq!(report.warning.as_deref(), Some("model_not_loaded"));
    }

    #[test]
    fn test_model_roundtrip_json() {
        let bytes = serde_json::to_vec(&test_model()).unwrap();
        let model = HealthModel::from_json_bytes(&bytes).unwrap();
        let (score, contributions) = model.score(&clean_metrics());
        assert!(score > 0.0 && score < 1.0);
        assert_eq!(contributions.len(), 6);
    }

    #[test]
    fn test_zero_scale_does_not_divide_by_zero() {
        let mut model = test_model();
        model.scales = [0.0; 6];
        let (score, _) = model.score(&clean_metrics());
        assert!(score.is_finite());
    }
}
