// Signed Bundle Lifecycle - verification and storage
// Extract-verify-materialise pipeline for model and policy bundles

//! # Bundle Verifier and Atomic Artifact Store
//!
//! A bundle is a gzip-compressed POSIX tar containing `manifest.json`,
//! `manifest.sig` (base64 RSA-PSS over the raw manifest bytes) and the
//! payload files the manifest lists with their SHA-256 hashes. Verification
//! happens in a throwaway sandbox; only fully verified content is
//! materialised into the content-addressed store.

pub mod builder;
pub mod manifest;
pub mod store;
pub mod verifier;

use ransomeye_crypto::CryptoError;
use thiserror::Error;

pub use builder::BundleBuilder;
pub use manifest::{BundleManifest, ManifestMetadata};
pub use store::{ArtifactStore, StoreConfig};
pub use verifier::{BundleVerifier, VerifiedBundle, VerifierLimits};

/// Rejection reasons for bundle intake and store access.
#[derive(Error, Debug)]
pub enum BundleError {
    #[error("manifest.json not found in bundle")]
    MissingManifest,
    #[error("manifest.sig not found in bundle")]
    MissingSignature,
    #[error("bundle signature verification failed")]
    SignatureInvalid,
    #[error("hash mismatch for {path}: expected {expected}, got {actual}")]
    HashMismatch {
        path: String,
        expected: String,
        actual: String,
    },
    #[error("archive entry escapes extraction directory: {0}")]
    PathEscape(String),
    #[error("malformed archive: {0}")]
    ArchiveMalformed(String),
    #[error("bundle exceeds limits: {0}")]
    SizeExceeded(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Crypto(CryptoError),
}

impl BundleError {
    /// Stable reason code surfaced to upload callers.
    pub fn kind(&self) -> &'static str {
        match self {
            BundleError::MissingManifest => "missing_manifest",
            BundleError::MissingSignature => "missing_signature",
            BundleError::SignatureInvalid => "signature_invalid",
            BundleError::HashMismatch { .. } => "hash_mismatch",
            BundleError::PathEscape(_) => "path_escape",
            BundleError::ArchiveMalformed(_) => "archive_malformed",
            BundleError::SizeExceeded(_) => "size_exceeded",
            BundleError::Io(_) => "io_error",
            BundleError::Crypto(e) => e.kind(),
        }
    }
}

impl From<CryptoError> for BundleError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::SignatureInvalid => BundleError::SignatureInvalid,
            other => BundleError::Crypto(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, BundleError>;
