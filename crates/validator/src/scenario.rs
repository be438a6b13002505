//! Scenario definitions.
//!
//! A scenario is an ordered list of named steps with per-step timeout and
//! retry budgets. The runner executes step bodies opaquely; the scenario
//! carries no behaviour of its own.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Built-in scenario families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    HappyPath,
    StressTest,
}

/// Budget for one step.
#[derive(Debug, Clone)]
pub struct StepSpec {
    pub name: String,
    pub timeout: Duration,
    pub retries: u32,
}

impl StepSpec {
    pub fn new(name: &str, timeout: Duration, retries: u32) -> Self {
        Self {
            name: name.to_string(),
            timeout,
            retries,
        }
    }
}

/// An instantiated scenario.
#[derive(Debug, Clone)]
pub struct ScenarioSpec {
    pub scenario_id: String,
    pub kind: ScenarioKind,
    pub name: String,
    pub steps: Vec<StepSpec>,
    /// Alert burst size for the stress scenario.
    pub alert_count: usize,
}

impl ScenarioSpec {
    /// Single alert through the full chain: inject, incident, evidence,
    /// chain integrity.
    pub fn happy_path() -> Self {
        Self {
            scenario_id: Uuid::new_v4().to_string(),
            kind: ScenarioKind::HappyPath,
            name: "happy_path".to_string(),
            steps: vec![
                StepSpec::new("inject_alert", Duration::from_secs(30), 2),
                StepSpec::new("await_incident", Duration::from_secs(60), 0),
                StepSpec::new("await_evidence", Duration::from_secs(90), 0),
                StepSpec::new("verify_chain", Duration::from_secs(30), 0),
            ],
            alert_count: 1,
        }
    }

    /// Burst of alerts through the ingest surface; verifies acceptance,
    /// not the downstream chain.
    pub fn stress_test(alert_count: usize) -> Self {
        Self {
            scenario_id: Uuid::new_v4().to_string(),
            kind: ScenarioKind::StressTest,
            name: "stress_test".to_string(),
            steps: vec![
                StepSpec::new("inject_burst", Duration::from_secs(120), 0),
                StepSpec::new("verify_acceptance", Duration::from_secs(10), 0),
            ],
            alert_count: alert_count.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_shape() {
        let scenario = ScenarioSpec::happy_path();
        let names: Vec<&str> = scenario.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["inject_alert", "await_incident", "await_evidence", "verify_chain"]
        );
        assert_eq!(scenario.kind, ScenarioKind::HappyPath);
    }

    #[test]
    fn test_stress_test_minimum_one_alert() {
        assert_eq!(ScenarioSpec::stress_test(0).alert_count, 1);
        assert_eq!(ScenarioSpec::stress_test(25).alert_count, 25);
    }
}
