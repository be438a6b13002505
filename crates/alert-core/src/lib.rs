// Alert Ingest Core - rules, deduplication and buffered persistence
// The hot path every ingested alert flows through

//! # Alert Core
//!
//! Heterogeneous ingress payloads are normalised at the boundary into the
//! canonical [`Alert`] and [`IocRecord`] shapes; everything past that point
//! operates over typed records. The evaluate / dedup / buffer stages share
//! no hidden state - callers wire them together and own the ordering.

pub mod alert;
pub mod buffer;
pub mod dedup;
pub mod evaluator;
pub mod ioc;
pub mod rules;
pub mod simhash;

use thiserror::Error;

pub use alert::{Alert, AlertSubmission};
pub use buffer::{AlertBuffer, BufferConfig, BufferStats};
pub use dedup::{DedupConfig, DedupStats, DedupVerdict, DuplicateFilter, DuplicateKind};
pub use evaluator::{evaluate, RuleMatch};
pub use ioc::{normalize_feed, normalize_feed_item, IocRecord, IocType};
pub use rules::{CompiledRule, Condition, ConditionKind, Rule, RuleSet, Severity};

#[derive(Error, Debug)]
pub enum AlertCoreError {
    #[error("ruleset is not valid JSON: {0}")]
    RulesetMalformed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AlertCoreError>;
