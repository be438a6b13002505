//! Sandbox extraction and verification of signed bundles.
//!
//! The archive is streamed into a fresh sandbox directory. Entries that
//! escape the sandbox, are symlinks or hard links, or carry setuid/setgid
//! bits are rejected outright. Only after the detached signature verifies
//! against the raw `manifest.json` bytes are the per-file hashes checked.

use crate::manifest::BundleManifest;
use crate::{BundleError, Result};
use flate2::read::GzDecoder;
use ransomeye_crypto::{hash_bytes, hash_file, verify_base64};
use rsa::RsaPublicKey;
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

const MANIFEST_NAME: &str = "manifest.json";
const SIGNATURE_NAME: &str = "manifest.sig";

/// Zip-bomb guards for extraction.
#[derive(Debug, Clone)]
pub struct VerifierLimits {
    /// Maximum total uncompressed payload size.
    pub max_uncompressed_bytes: u64,
    /// Maximum number of archive entries.
    pub max_file_count: usize,
}

impl Default for VerifierLimits {
    fn default() -> Self {
        Self {
            max_uncompressed_bytes: 5 * 1024 * 1024 * 1024,
            max_file_count: 50_000,
        }
    }
}

/// A bundle that passed signature and hash verification.
///
/// The sandbox directory is removed when this value drops; callers that
/// want the content must materialise it into the artifact store first.
#[derive(Debug)]
pub struct VerifiedBundle {
    sandbox: TempDir,
    pub manifest: BundleManifest,
    /// SHA-256 of the on-wire `manifest.json` bytes - the artifact identity.
    pub manifest_hash: String,
    pub manifest_bytes: Vec<u8>,
    pub signature_b64: String,
}

impl VerifiedBundle {
    pub fn sandbox_path(&self) -> &Path {
        self.sandbox.path()
    }
}

/// Verifies bundle archives against a trusted public key.
#[derive(Debug, Clone)]
pub struct BundleVerifier {
    public_key: RsaPublicKey,
    limits: VerifierLimits,
}

impl BundleVerifier {
    pub fn new(public_key: RsaPublicKey, limits: VerifierLimits) -> Self {
        Self { public_key, limits }
    }

    /// Extract `bundle_path` into a fresh sandbox under `extract_parent` and
    /// run the full verification procedure. The sandbox is removed on any
    /// failure.
    pub fn verify(&self, bundle_path: &Path, extract_parent: &Path) -> Result<VerifiedBundle> {
        std::fs::create_dir_all(extract_parent)?;
        let sandbox = tempfile::Builder::new()
            .prefix(".verify-")
            .tempdir_in(extract_parent)?;

        debug!(bundle = %bundle_path.display(), sandbox = %sandbox.path().display(), "extracting bundle");
        self.extract_into(bundle_path, sandbox.path())?;

        let manifest_path = sandbox.path().join(MANIFEST_NAME);
        if !manifest_path.is_file() {
            return Err(BundleError::MissingManifest);
        }
        let signature_path = sandbox.path().join(SIGNATURE_NAME);
        if !signature_path.is_file() {
            return Err(BundleError::MissingSignature);
        }

        // Signature covers the raw bytes as delivered; verify before parsing.
        let manifest_bytes = std::fs::read(&manifest_path)?;
        let signature_b64 = std::fs::read_to_string(&signature_path)?;
        verify_base64(&self.public_key, &manifest_bytes, &signature_b64)?;

        let manifest = BundleManifest::parse(&manifest_bytes)?;
        self.verify_file_hashes(sandbox.path(), &manifest)?;
        self.reject_unlisted_files(sandbox.path(), &manifest)?;

        let manifest_hash = hash_bytes(&manifest_bytes);
        info!(
            name = manifest.name(),
            version = manifest.version(),
            manifest_hash = %manifest_hash,
            files = manifest.files.len(),
            "bundle verified"
        );

        Ok(VerifiedBundle {
            sandbox,
            manifest,
            manifest_hash,
            manifest_bytes,
            signature_b64: signature_b64.trim().to_string(),
        })
    }

    fn extract_into(&self, bundle_path: &Path, sandbox: &Path) -> Result<()> {
        let file = File::open(bundle_path)?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));

        let mut total_bytes: u64 = 0;
        let mut file_count: usize = 0;

        let entries = archive
            .entries()
            .map_err(|e| BundleError::ArchiveMalformed(e.to_string()))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| BundleError::ArchiveMalformed(e.to_string()))?;

            file_count += 1;
            if file_count > self.limits.max_file_count {
                return Err(BundleError::SizeExceeded(format!(
                    "more than {} entries",
                    self.limits.max_file_count
                )));
            }
            total_bytes = total_bytes.saturating_add(entry.header().size().unwrap_or(0));
            if total_bytes > self.limits.max_uncompressed_bytes {
                return Err(BundleError::SizeExceeded(format!(
                    "uncompressed size over {} bytes",
                    self.limits.max_uncompressed_bytes
                )));
            }

            let entry_type = entry.header().entry_type();
            if entry_type.is_symlink() || entry_type.is_hard_link() {
                return Err(BundleError::PathEscape(format!(
                    "link entry {:?}",
                    entry.path().unwrap_or_default()
                )));
            }
            if !entry_type.is_file() && !entry_type.is_dir() {
                return Err(BundleError::ArchiveMalformed(format!(
                    "unsupported entry type {entry_type:?}"
                )));
            }
            if let Ok(mode) = entry.header().mode() {
                if mode & 0o6000 != 0 {
                    return Err(BundleError::ArchiveMalformed(format!(
                        "setuid/setgid entry {:?}",
                        entry.path().unwrap_or_default()
                    )));
                }
            }

            let raw_path = entry
                .path()
                .map_err(|e| BundleError::ArchiveMalformed(e.to_string()))?
                .into_owned();
            let dest = safe_join(sandbox, &raw_path)?;

            if entry_type.is_dir() {
                std::fs::create_dir_all(&dest)?;
            } else {
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                entry
                    .unpack(&dest)
                    .map_err(|e| BundleError::ArchiveMalformed(e.to_string()))?;
            }
        }
        Ok(())
    }

    fn verify_file_hashes(&self, sandbox: &Path, manifest: &BundleManifest) -> Result<()> {
        for (rel, expected) in &manifest.files {
            let path = safe_join(sandbox, Path::new(rel))?;
            if !path.is_file() {
                warn!(path = %rel, "file listed in manifest is absent");
                return Err(BundleError::HashMismatch {
                    path: rel.clone(),
                    expected: expected.clone(),
                    actual: "missing".to_string(),
                });
            }
            let actual = hash_file(&path)?;
            if &actual != expected {
                return Err(BundleError::HashMismatch {
                    path: rel.clone(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(())
    }

    /// Every file on disk must appear in the manifest (besides the manifest
    /// envelope itself); smuggled extras invalidate the bundle.
    fn reject_unlisted_files(&self, sandbox: &Path, manifest: &BundleManifest) -> Result<()> {
        let mut stack = vec![sandbox.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for dent in std::fs::read_dir(&dir)? {
                let dent = dent?;
                let path = dent.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                let rel = path
                    .strip_prefix(sandbox)
                    .map_err(|_| BundleError::PathEscape(path.display().to_string()))?
                    .to_string_lossy()
                    .into_owned();
                if rel == MANIFEST_NAME || rel == SIGNATURE_NAME {
                    continue;
                }
                if !manifest.files.contains_key(&rel) {
                    return Err(BundleError::ArchiveMalformed(format!(
                        "file not listed in manifest: {rel}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Join a relative path onto `base`, rejecting absolute paths and any
/// parent-directory traversal.
pub(crate) fn safe_join(base: &Path, rel: &Path) -> Result<PathBuf> {
    let mut out = base.to_path_buf();
    for component in rel.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => {
                return Err(BundleError::PathEscape(rel.display().to_string()));
            }
        }
    }
    Ok(out)
}
