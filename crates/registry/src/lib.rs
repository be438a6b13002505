// Artifact Registry - transactional catalog and active-artifact management
// Single-active-per-name invariant enforced at the database layer

//! # Registry
//!
//! The catalog is the source of truth for artifact identity and lifecycle
//! (`inactive` / `active` / `deprecated`); the [`ActiveArtifact`] holder is
//! the in-memory hot-swap point request paths read from. The registry owns
//! its rows exclusively; filesystem content belongs to the artifact store.

pub mod active;
pub mod catalog;

use thiserror::Error;

pub use active::{ActiveArtifact, ActiveEntry, ActiveInfo};
pub use catalog::{
    ActivationOutcome, ArtifactRecord, ArtifactRegistry, ArtifactStatus, NewArtifact,
    RegisterOutcome,
};

/// Catalog conflicts with stable reason codes.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("artifact with manifest hash {0} already registered")]
    DuplicateHash(String),
    #[error("cannot delete artifact {0} while it is active")]
    ActiveDelete(String),
    #[error("unknown artifact id {0}")]
    UnknownId(String),
    #[error("database error: {0}")]
    Database(String),
}

impl RegistryError {
    pub fn kind(&self) -> &'static str {
        match self {
            RegistryError::DuplicateHash(_) => "duplicate_hash",
            RegistryError::ActiveDelete(_) => "active_delete",
            RegistryError::UnknownId(_) => "unknown_id",
            RegistryError::Database(_) => "database_error",
        }
    }
}

impl From<rusqlite::Error> for RegistryError {
    fn from(e: rusqlite::Error) -> Self {
        RegistryError::Database(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
