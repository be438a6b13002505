//! RSA-PSS signing and verification.
//!
//! Parameters are fixed platform-wide: SHA-256 digest, MGF1-SHA256, and the
//! maximum salt length the key size allows. Signatures travel base64-encoded
//! in detached `.sig` files and JSON fields.

use crate::{CryptoError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rsa::{Pss, RsaPrivateKey, RsaPublicKey};
use rsa::traits::PublicKeyParts;
use sha2::{Digest, Sha256};

/// Maximum PSS salt length for a key: modulus bytes minus digest and
/// trailer overhead.
fn max_salt_len(modulus_bytes: usize) -> usize {
    modulus_bytes - Sha256::output_size() - 2
}

/// Sign `data` with RSA-PSS, returning the raw signature bytes.
pub fn sign(private: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>> {
    let digest = Sha256::digest(data);
    let padding = Pss::new_with_salt::<Sha256>(max_salt_len(private.size()));
    let mut rng = rand::thread_rng();
    private
        .sign_with_rng(&mut rng, padding, &digest)
        .map_err(|e| CryptoError::KeyMalformed(format!("signing failed: {e}")))
}

/// Verify an RSA-PSS signature over `data`.
pub fn verify(public: &RsaPublicKey, data: &[u8], signature: &[u8]) -> Result<()> {
    let digest = Sha256::digest(data);
    let padding = Pss::new_with_salt::<Sha256>(max_salt_len(public.size()));
    public
        .verify(padding, &digest, signature)
        .map_err(|_| CryptoError::SignatureInvalid)
}

/// Sign `data` and return the signature base64-encoded.
pub fn sign_base64(private: &RsaPrivateKey, data: &[u8]) -> Result<String> {
    Ok(BASE64.encode(sign(private, data)?))
}

/// Verify a base64-encoded signature over `data`.
pub fn verify_base64(public: &RsaPublicKey, data: &[u8], signature_b64: &str) -> Result<()> {
    let signature = BASE64
        .decode(signature_b64.trim())
        .map_err(|_| CryptoError::SignatureInvalid)?;
    verify(public, data, &signature)
}
