//! RSA key material: load, generate-on-first-use, PEM persistence.

use crate::{CryptoError, Result};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tracing::{info, warn};

/// Key size for all platform signing keys.
pub const RSA_KEY_BITS: usize = 4096;

/// A signing key pair held in memory.
///
/// The private key file is PKCS#8 PEM with mode 0600; the public key is
/// SPKI PEM with mode 0644.
#[derive(Debug, Clone)]
pub struct KeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl KeyPair {
    /// Generate a fresh key pair of the given size.
    pub fn generate(bits: usize) -> Result<Self> {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| CryptoError::KeyMalformed(format!("key generation failed: {e}")))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    /// Load a key pair from a PKCS#8 PEM private key file.
    pub fn load(private_path: &Path) -> Result<Self> {
        if !private_path.exists() {
            return Err(CryptoError::KeyMissing(private_path.display().to_string()));
        }
        let pem = fs::read_to_string(private_path)?;
        let private = RsaPrivateKey::from_pkcs8_pem(&pem)
            .map_err(|e| CryptoError::KeyMalformed(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    /// Load the key pair from disk, generating and persisting an RSA-4096
    /// pair on first use if the private key file is absent.
    pub fn load_or_generate(private_path: &Path, public_path: &Path) -> Result<Self> {
        match Self::load(private_path) {
            Ok(pair) => Ok(pair),
            Err(CryptoError::KeyMissing(_)) => {
                warn!(
                    path = %private_path.display(),
                    "signing key not found, generating RSA-{RSA_KEY_BITS} pair"
                );
                let pair = Self::generate(RSA_KEY_BITS)?;
                pair.persist(private_path, public_path)?;
                Ok(pair)
            }
            Err(e) => Err(e),
        }
    }

    /// Write the key pair to disk with the required file modes.
    pub fn persist(&self, private_path: &Path, public_path: &Path) -> Result<()> {
        if let Some(parent) = private_path.parent() {
            fs::create_dir_all(parent)?;
        }
        if let Some(parent) = public_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let private_pem = self
            .private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyMalformed(e.to_string()))?;
        fs::write(private_path, private_pem.as_bytes())?;
        fs::set_permissions(private_path, fs::Permissions::from_mode(0o600))?;

        let public_pem = self
            .public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyMalformed(e.to_string()))?;
        fs::write(public_path, public_pem.as_bytes())?;
        fs::set_permissions(public_path, fs::Permissions::from_mode(0o644))?;

        info!(
            private = %private_path.display(),
            public = %public_path.display(),
            "signing key pair persisted"
        );
        Ok(())
    }

    pub fn private(&self) -> &RsaPrivateKey {
        &self.private
    }

    pub fn public(&self) -> &RsaPublicKey {
        &self.public
    }
}

/// Load a standalone public key (SPKI PEM) for verification-only callers.
pub fn load_public_key(path: &Path) -> Result<RsaPublicKey> {
    if !path.exists() {
        return Err(CryptoError::KeyMissing(path.display().to_string()));
    }
    let pem = fs::read_to_string(path)?;
    RsaPublicKey::from_public_key_pem(&pem).map_err(|e| CryptoError::KeyMalformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_persist_reload() {
        let dir = tempfile::tempdir().unwrap();
        let priv_path = dir.path().join("keys/sign_key.pem");
        let pub_path = dir.path().join("keys/sign_key.pub");

        let pair = KeyPair::generate(2048).unwrap();
        pair.persist(&priv_path, &pub_path).unwrap();

        let mode = fs::metadata(&priv_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        let pub_mode = fs::metadata(&pub_path).unwrap().permissions().mode();
        assert_eq!(pub_mode & 0o777, 0o644);

        let reloaded = KeyPair::load(&priv_path).unwrap();
        assert_eq!(reloaded.public(), pair.public());

        let public_only = load_public_key(&pub_path).unwrap();
        assert_eq!(&public_only, pair.public());
    }

    #[test]
    fn test_load_missing_key_reports_key_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = KeyPair::load(&dir.path().join("absent.pem")).unwrap_err();
        assert_eq!(err.kind(), "key_missing");
    }

    #[test]
    fn test_load_garbage_reports_key_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.pem");
        fs::write(&path, "not a pem").unwrap();
        let err = KeyPair::load(&path).unwrap_err();
        assert_eq!(err.kind(), "key_malformed");
    }
}
