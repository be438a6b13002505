//! Alert evaluation against a compiled ruleset snapshot.
//!
//! Callers take the snapshot from the active-artifact manager once per
//! alert; a concurrent hot-swap never changes the set mid-evaluation.

use crate::alert::Alert;
use crate::rules::{ConditionKind, RuleSet, Severity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One matching rule, as returned to the ingress caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleMatch {
    pub rule_id: String,
    pub rule_name: String,
    pub severity: Severity,
    pub action: String,
    pub description: String,
}

/// Evaluate an alert against every rule in the snapshot, returning the
/// matches in rule order. The ruleset is never mutated.
pub fn evaluate(ruleset: &RuleSet, alert: &Alert) -> Vec<RuleMatch> {
    let fields = field_map(alert);
    let mut matches = Vec::new();

    for compiled in &ruleset.rules {
        let condition = &compiled.rule.condition;
        let field_value = fields
            .get(condition.field.as_str())
            .map(String::as_str)
            .unwrap_or("");

        let hit = match condition.kind {
            ConditionKind::Exact => condition
                .value
                .as_ref()
                .map(|v| field_value == coerce_str(v))
                .unwrap_or(false),
            ConditionKind::EqualsCi => condition
                .value
                .as_ref()
                .map(|v| field_value.eq_ignore_ascii_case(&coerce_str(v)))
                .unwrap_or(false),
            ConditionKind::Substring => condition
                .value
                .as_ref()
                .map(|v| {
                    field_value
                        .to_lowercase()
                        .contains(&coerce_str(v).to_lowercase())
                })
                .unwrap_or(false),
            ConditionKind::Regex => compiled
                .pattern
                .as_ref()
                .map(|p| p.is_match(field_value))
                .unwrap_or(false),
            ConditionKind::NumericRange => match field_value.trim().parse::<f64>() {
                Ok(x) => {
                    condition.min.map(|min| x >= min).unwrap_or(true)
                        && condition.max.map(|max| x <= max).unwrap_or(true)
                }
                Err(_) => false,
            },
        };

        if hit {
            matches.push(RuleMatch {
                rule_id: compiled.rule.rule_id.clone(),
                rule_name: compiled.rule.name.clone(),
                severity: compiled.rule.severity,
                action: compiled.rule.action.clone(),
                description: compiled.rule.description.clone(),
            });
        }
    }
    matches
}

/// Field-value map the operators look into: the core alert fields (with
/// `type` as an alias for `alert_type`) plus every metadata entry coerced
/// to a string.
fn field_map(alert: &Alert) -> BTreeMap<&str, String> {
    let mut fields: BTreeMap<&str, String> = BTreeMap::new();
    fields.insert("source", alert.source.clone());
    fields.insert("alert_type", alert.alert_type.clone());
    fields.insert("type", alert.alert_type.clone());
    fields.insert("target", alert.target.clone());
    fields.insert("severity", alert.severity.as_str().to_string());
    for (key, value) in &alert.metadata {
        fields.insert(key.as_str(), coerce_str(value));
    }
    fields
}

fn coerce_str(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
