// Cryptographic Kernel
// Signing, hashing and key management shared by every RansomEye service

//! # Crypto Kernel
//!
//! All signatures in the platform are RSA-PSS (MGF1-SHA256, maximum salt
//! length for the key size) over SHA-256 digests. Keys are RSA-4096 in
//! PKCS#8 PEM. Every other crate goes through this one for hashing,
//! canonical serialization and signature handling so that the bundle
//! verifier, audit ledger and run attestation agree bit-for-bit.

pub mod hashing;
pub mod keys;
pub mod signing;

use thiserror::Error;

pub use hashing::{canonical_json_bytes, hash_bytes, hash_file, hash_stream};
pub use keys::{load_public_key, KeyPair};
pub use signing::{sign, sign_base64, verify, verify_base64};

/// Crypto failure with a stable reason code.
///
/// The `kind()` string is part of the external error contract and is what
/// API callers match on.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("signing key not found at {0}")]
    KeyMissing(String),
    #[error("key material is malformed: {0}")]
    KeyMalformed(String),
    #[error("signature verification failed")]
    SignatureInvalid,
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CryptoError {
    /// Stable reason code for API responses and ledger entries.
    pub fn kind(&self) -> &'static str {
        match self {
            CryptoError::KeyMissing(_) => "key_missing",
            CryptoError::KeyMalformed(_) => "key_malformed",
            CryptoError::SignatureInvalid => "signature_invalid",
            CryptoError::HashMismatch { .. } => "hash_mismatch",
            CryptoError::Io(_) => "io_error",
            CryptoError::Serialization(_) => "serialization_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, CryptoError>;
