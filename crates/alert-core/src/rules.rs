//! Rule shape, compilation and the active ruleset.
//!
//! Rules arrive inside policy bundles as JSON. Compilation pre-builds regex
//! matchers; a rule that fails to compile is dropped with a counter bump and
//! never poisons the rest of the batch.

use crate::{AlertCoreError, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Rule and alert severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }

    /// Boundary parsing: unknown strings fall back to `Medium`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "low" => Severity::Low,
            _ => Severity::Medium,
        }
    }
}

/// Condition operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConditionKind {
    Exact,
    EqualsCi,
    Substring,
    Regex,
    NumericRange,
}

/// A rule's single condition. `value` serves the string operators,
/// `pattern` the regex operator, `min`/`max` the numeric range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    pub field: String,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

/// One rule as shipped in a policy bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: String,
    pub name: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default = "default_action")]
    pub action: String,
    #[serde(default)]
    pub description: String,
    pub condition: Condition,
}

fn default_action() -> String {
    "log_only".to_string()
}

/// A rule with its regex pre-compiled (case-insensitively).
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: Rule,
    pub pattern: Option<Regex>,
}

/// An immutable, fully compiled ruleset. Consumers hold it behind an `Arc`
/// snapshot from the active-artifact manager and never mutate it.
#[derive(Debug, Default)]
pub struct RuleSet {
    pub rules: Vec<CompiledRule>,
    /// Rules dropped during compilation.
    pub dropped: u64,
}

impl RuleSet {
    /// Compile a batch. Compile failures drop the rule and continue.
    pub fn compile(rules: Vec<Rule>) -> Self {
        let mut compiled = Vec::with_capacity(rules.len());
        let mut dropped = 0u64;

        for rule in rules {
            match compile_rule(rule) {
                Ok(c) => compiled.push(c),
                Err((rule_id, reason)) => {
                    dropped += 1;
                    warn!(rule_id = %rule_id, reason = %reason, "dropping uncompilable rule");
                }
            }
        }

        info!(rules = compiled.len(), dropped, "ruleset compiled");
        Self {
            rules: compiled,
            dropped,
        }
    }

    /// Parse and compile a `rules.json` document: either a top-level array
    /// or `{"rules": [...]}`.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        #[derive(Deserialize)]
        struct Wrapper {
            rules: Vec<Rule>,
        }

        let rules: Vec<Rule> = match serde_json::from_slice::<Vec<Rule>>(bytes) {
            Ok(list) => list,
            Err(_) => {
                let wrapper: Wrapper = serde_json::from_slice(bytes)
                    .map_err(|e| AlertCoreError::RulesetMalformed(e.to_string()))?;
                wrapper.rules
            }
        };
        Ok(Self::compile(rules))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn compile_rule(rule: Rule) -> std::result::Result<CompiledRule, (String, String)> {
    let pattern = match rule.condition.kind {
        ConditionKind::Regex => {
            let raw = rule
                .condition
                .pattern
                .as_deref()
                .ok_or_else(|| (rule.rule_id.clone(), "regex rule without pattern".to_string()))?;
            let compiled = RegexBuilder::new(raw)
                .case_insensitive(true)
                .build()
                .map_err(|e| (rule.rule_id.clone(), e.to_string()))?;
            Some(compiled)
        }
        ConditionKind::NumericRange => {
            if rule.condition.min.is_none() && rule.condition.max.is_none() {
                return Err((
                    rule.rule_id.clone(),
                    "numeric-range rule without min or max".to_string(),
                ));
            }
            None
        }
        _ => {
            if rule.condition.value.is_none() {
                return Err((rule.rule_id.clone(), "rule without value".to_string()));
            }
            None
        }
    };
    Ok(CompiledRule { rule, pattern })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule_json(kind: &str, extra: serde_json::Value) -> serde_json::Value {
        let mut condition = json!({"type": kind, "field": "target"});
        condition
            .as_object_mut()
            .unwrap()
            .extend(extra.as_object().unwrap().clone());
        json!({
            "rule_id": "r1",
            "name": "test rule",
            "severity": "high",
            "action": "alert",
            "condition": condition
        })
    }

    #[test]
    fn test_compile_batch_drops_bad_regex_only() {
        let rules: Vec<Rule> = vec![
            serde_json::from_value(rule_json("regex", json!({"pattern": "ransom.*"}))).unwrap(),
            serde_json::from_value(rule_json("regex", json!({"pattern": "([unclosed"}))).unwrap(),
            serde_json::from_value(rule_json("exact", json!({"value": "x"}))).unwrap(),
        ];

        let ruleset = RuleSet::compile(rules);
        assert_eq!(ruleset.len(), 2);
        assert_eq!(ruleset.dropped, 1);
    }

    #[test]
    fn test_from_json_accepts_both_layouts() {
        let array = json!([rule_json("exact", json!({"value": "x"}))]);
        let wrapped = json!({"rules": [rule_json("exact", json!({"value": "x"}))]});

        let a = RuleSet::from_json_bytes(array.to_string().as_bytes()).unwrap();
        let b = RuleSet::from_json_bytes(wrapped.to_string().as_bytes()).unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_malformed_document_is_an_error_not_a_panic() {
        let err = RuleSet::from_json_bytes(b"not json").unwrap_err();
        assert!(matches!(err, AlertCoreError::RulesetMalformed(_)));
    }

    #[test]
    fn test_regex_is_case_insensitive() {
        let rules: Vec<Rule> =
            vec![serde_json::from_value(rule_json("regex", json!({"pattern": "LockBit"}))).unwrap()];
        let ruleset = RuleSet::compile(rules);
        let pattern = ruleset.rules[0].pattern.as_ref().unwrap();
        assert!(pattern.is_match("detected lockbit beacon"));
    }
}
