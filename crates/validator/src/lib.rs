// Synthetic End-to-End Validator
// Injects ransomware-shaped traffic, proves the alert->incident->evidence
// chain, scores run health and emits signed, ledgered artifacts

//! # Global Validator
//!
//! A validation run drives ordered scenario steps against the live ingest
//! surface, polls downstream stores with bounded exponential backoff, and
//! then attests the outcome: render PDF, hash it, sign the run manifest,
//! persist everything under `runs/`, append a signed ledger entry. The gate
//! is fail-closed - any failure produces a FAILED ledger entry and an error
//! to the caller, never a partial success.

pub mod attestation;
pub mod chain;
pub mod health;
pub mod injector;
pub mod orchestrator;
pub mod report;
pub mod run_store;
pub mod runner;
pub mod scenario;

use ransomeye_crypto::CryptoError;
use ransomeye_ledger::LedgerError;
use thiserror::Error;

pub use attestation::{AttestationOutcome, Attestor, RunVerification};
pub use chain::{ChainReport, ChainVerifier, RecordQuery, RecordSource, SqliteRecordSource};
pub use health::{HealthModel, HealthReport, HealthScorer, FEATURE_NAMES};
pub use injector::Injector;
pub use orchestrator::{OrchestratorConfig, ValidationOrchestrator};
pub use run_store::RunStore;
pub use runner::{
    run_steps, RunMetrics, RunRecord, RunStatus, ScenarioStep, StepContext, StepResult, StepStatus,
};
pub use scenario::{ScenarioKind, ScenarioSpec, StepSpec};

#[derive(Error, Debug)]
pub enum ValidatorError {
    #[error("{what} not found within {timeout_secs}s")]
    TimedOut { what: String, timeout_secs: u64 },
    #[error("operation cancelled by shutdown")]
    Cancelled,
    #[error("validation run {run_id} failed")]
    ScenarioFailed { run_id: String },
    #[error("run {0} not found")]
    RunNotFound(String),
    #[error("attestation failed: {0}")]
    Attestation(String),
    #[error("record source error: {0}")]
    Source(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl ValidatorError {
    pub fn kind(&self) -> &'static str {
        match self {
            ValidatorError::TimedOut { .. } => "timed_out",
            ValidatorError::Cancelled => "cancelled",
            ValidatorError::ScenarioFailed { .. } => "scenario_failed",
            ValidatorError::RunNotFound(_) => "run_not_found",
            ValidatorError::Attestation(_) => "attestation_failed",
            ValidatorError::Source(_) => "source_error",
            ValidatorError::Io(_) => "io_error",
            ValidatorError::Crypto(e) => e.kind(),
            ValidatorError::Ledger(_) => "ledger_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, ValidatorError>;
