//! Atomic artifact store.
//!
//! Content layout: `<root>/<artifact_id>/<relative paths...>`. All writes go
//! through temp-then-rename; extraction lands in `.extracting/` first and
//! partial state is removed on error. Demoted artifacts are re-packed into
//! `<root>/../archive/<name>/<hash-prefix>.tar.gz` and reaped by an explicit
//! retention tick, never by a background timer of the store's own.

use crate::verifier::{safe_join, VerifiedBundle};
use crate::{BundleError, Result};
use chrono::{Duration, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Store location and retention policy.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding one subdirectory per artifact.
    pub artifacts_root: PathBuf,
    /// Directory holding archived (demoted) artifact tarballs.
    pub archive_root: PathBuf,
    /// Age after which archived tarballs are reaped on a maintenance tick.
    pub archive_retention_days: i64,
}

impl StoreConfig {
    pub fn under(storage_root: &Path) -> Self {
        Self {
            artifacts_root: storage_root.join("artifacts"),
            archive_root: storage_root.join("archive"),
            archive_retention_days: 30,
        }
    }
}

/// Owns every filesystem object under the per-artifact directories.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    config: StoreConfig,
}

impl ArtifactStore {
    pub fn new(config: StoreConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.artifacts_root)?;
        std::fs::create_dir_all(&config.archive_root)?;
        Ok(Self { config })
    }

    /// Directory that holds (or will hold) an artifact's files.
    pub fn artifact_dir(&self, artifact_id: &str) -> PathBuf {
        self.config.artifacts_root.join(artifact_id)
    }

    /// Move a verified bundle's sandbox content into the artifact directory.
    ///
    /// Files are staged under `.extracting/` and renamed into place one
    /// entry at a time; any error removes the partial state.
    pub fn materialize(&self, artifact_id: &str, verified: &VerifiedBundle) -> Result<PathBuf> {
        let dest = self.artifact_dir(artifact_id);
        let staging = dest.join(".extracting");

        let result = self.stage_and_promote(verified.sandbox_path(), &dest, &staging);
        if result.is_err() {
            if staging.exists() {
                let _ = std::fs::remove_dir_all(&staging);
            }
            let _ = std::fs::remove_dir_all(&dest);
        }
        result?;

        info!(artifact_id, dest = %dest.display(), "artifact materialised");
        Ok(dest)
    }

    fn stage_and_promote(&self, sandbox: &Path, dest: &Path, staging: &Path) -> Result<()> {
        std::fs::create_dir_all(staging)?;
        copy_tree(sandbox, staging)?;

        for dent in std::fs::read_dir(staging)? {
            let dent = dent?;
            let target = dest.join(dent.file_name());
            if target.exists() {
                if target.is_dir() {
                    std::fs::remove_dir_all(&target)?;
                } else {
                    std::fs::remove_file(&target)?;
                }
            }
            std::fs::rename(dent.path(), &target)?;
        }
        std::fs::remove_dir(staging)?;
        Ok(())
    }

    /// Atomically write a single file under an artifact directory
    /// (temp-then-rename).
    pub fn write_atomic(&self, artifact_id: &str, name: &str, data: &[u8]) -> Result<PathBuf> {
        let dir = self.artifact_dir(artifact_id);
        std::fs::create_dir_all(&dir)?;
        let final_path = safe_join(&dir, Path::new(name))?;
        let tmp_path = dir.join(format!(".{name}.tmp"));

        std::fs::write(&tmp_path, data)?;
        std::fs::rename(&tmp_path, &final_path)?;
        debug!(artifact_id, name, "atomic write complete");
        Ok(final_path)
    }

    /// Resolve a relative path inside an artifact directory. Cross-directory
    /// references are a hard error, never a warning.
    pub fn file_path(&self, artifact_id: &str, relative: &str) -> Result<PathBuf> {
        let dir = self.artifact_dir(artifact_id);
        let path = safe_join(&dir, Path::new(relative))?;
        Ok(path)
    }

    /// Copy a demoted artifact into the archive as
    /// `archive/<name>/<hash-prefix>.tar.gz`. The artifact directory stays
    /// in place; the registry row still references it while inactive.
    pub fn archive_artifact(&self, artifact_id: &str, name: &str, manifest_hash: &str) -> Result<PathBuf> {
        let src = self.artifact_dir(artifact_id);
        if !src.is_dir() {
            return Err(BundleError::ArchiveMalformed(format!(
                "artifact directory missing: {artifact_id}"
            )));
        }

        let prefix: String = manifest_hash.chars().take(12).collect();
        let dest_dir = self.config.archive_root.join(name);
        std::fs::create_dir_all(&dest_dir)?;
        let dest = dest_dir.join(format!("{prefix}.tar.gz"));

        let out = File::create(&dest)?;
        let enc = GzEncoder::new(out, Compression::default());
        let mut builder = tar::Builder::new(enc);
        builder
            .append_dir_all(".", &src)
            .map_err(|e| BundleError::ArchiveMalformed(e.to_string()))?;
        builder
            .into_inner()
            .map_err(|e| BundleError::ArchiveMalformed(e.to_string()))?
            .finish()?;

        info!(artifact_id, archive = %dest.display(), "artifact archived");
        Ok(dest)
    }

    /// Remove an artifact directory outright (inactive artifacts only; the
    /// registry enforces the status gate).
    pub fn delete_artifact(&self, artifact_id: &str) -> Result<()> {
        let dir = self.artifact_dir(artifact_id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
            info!(artifact_id, "artifact files deleted");
        }
        Ok(())
    }

    /// Reap archived tarballs older than the retention window. Invoked from
    /// the caller's maintenance tick; returns the number reaped.
    pub fn retention_sweep(&self) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(self.config.archive_retention_days);
        let mut reaped = 0;

        for name_dir in read_dir_or_empty(&self.config.archive_root)? {
            if !name_dir.is_dir() {
                continue;
            }
            for tarball in read_dir_or_empty(&name_dir)? {
                let meta = std::fs::metadata(&tarball)?;
                let modified: chrono::DateTime<Utc> = meta.modified()?.into();
                if modified < cutoff {
                    if let Err(e) = std::fs::remove_file(&tarball) {
                        warn!(path = %tarball.display(), error = %e, "failed to reap archive");
                    } else {
                        reaped += 1;
                    }
                }
            }
        }
        if reaped > 0 {
            info!(reaped, "archive retention sweep complete");
        }
        Ok(reaped)
    }

    /// List the relative paths of every file under an artifact directory.
    pub fn list_files(&self, artifact_id: &str) -> Result<Vec<String>> {
        let dir = self.artifact_dir(artifact_id);
        let mut out = Vec::new();
        if !dir.exists() {
            return Ok(out);
        }
        let mut stack = vec![dir.clone()];
        while let Some(current) = stack.pop() {
            for dent in std::fs::read_dir(&current)? {
                let path = dent?.path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    let rel = path
                        .strip_prefix(&dir)
                        .map_err(|_| BundleError::PathEscape(path.display().to_string()))?
                        .to_string_lossy()
                        .into_owned();
                    out.push(rel);
                }
            }
        }
        out.sort();
        Ok(out)
    }
}

fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    for dent in std::fs::read_dir(src)? {
        let dent = dent?;
        let from = dent.path();
        let to = dst.join(dent.file_name());
        if from.is_dir() {
            std::fs::create_dir_all(&to)?;
            copy_tree(&from, &to)?;
        } else {
            std::fs::copy(&from, &to)?;
        }
    }
    Ok(())
}

fn read_dir_or_empty(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for dent in std::fs::read_dir(dir)? {
        out.push(dent?.path());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::BundleBuilder;
    use crate::manifest::ManifestMetadata;
    use crate::verifier::{BundleVerifier, VerifierLimits};
    use ransomeye_crypto::KeyPair;
    use std::collections::BTreeMap;

    fn verified_bundle(dir: &Path, pair: &KeyPair) -> VerifiedBundle {
        let src = dir.join("src");
        std::fs::create_dir_all(src.join("nested")).unwrap();
        std::fs::write(src.join("model.bin"), b"abc").unwrap();
        std::fs::write(src.join("nested/names.json"), b"[]").unwrap();

        let out = dir.join("bundle.tar.gz");
        BundleBuilder::new(ManifestMetadata {
            name: "detector".to_string(),
            version: "1.0.0".to_string(),
            extra: BTreeMap::new(),
        })
        .build(&src, pair.private(), &out)
        .unwrap();

        BundleVerifier::new(pair.public().clone(), VerifierLimits::default())
            .verify(&out, &dir.join("work"))
            .unwrap()
    }

    #[test]
    fn test_materialize_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let pair = KeyPair::generate(2048).unwrap();
        let verified = verified_bundle(dir.path(), &pair);

        let store = ArtifactStore::new(StoreConfig::under(&dir.path().join("storage"))).unwrap();
        let dest = store.materialize("art-1", &verified).unwrap();

        assert!(dest.join("model.bin").is_file());
        assert!(dest.join("nested/names.json").is_file());
        assert!(!dest.join(".extracting").exists());

        let files = store.list_files("art-1").unwrap();
        assert!(files.contains(&"model.bin".to_string()));
        assert!(files.contains(&"manifest.json".to_string()));
    }

    #[test]
    fn test_file_path_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(StoreConfig::under(dir.path())).unwrap();

        let err = store.file_path("art-1", "../other/secret").unwrap_err();
        assert_eq!(err.kind(), "path_escape");
        let err = store.file_path("art-1", "/etc/passwd").unwrap_err();
        assert_eq!(err.kind(), "path_escape");
    }

    #[test]
    fn test_write_atomic_leaves_no_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(StoreConfig::under(dir.path())).unwrap();

        let path = store.write_atomic("art-2", "weights.json", b"{}").unwrap();
        assert!(path.is_file());
        assert!(!store.artifact_dir("art-2").join(".weights.json.tmp").exists());
    }

    #[test]
    fn test_archive_and_retention() {
        let dir = tempfile::tempdir().unwrap();
        let pair = KeyPair::generate(2048).unwrap();
        let verified = verified_bundle(dir.path(), &pair);

        let mut config = StoreConfig::under(&dir.path().join("storage"));
        config.archive_retention_days = 0;
        let store = ArtifactStore::new(config).unwrap();
        store.materialize("art-3", &verified).unwrap();

        let tarball = store
            .archive_artifact("art-3", "detector", &verified.manifest_hash)
            .unwrap();
        assert!(tarball.is_file());
        // The live directory is untouched; only the archive copy ages out.
        assert!(store.artifact_dir("art-3").join("model.bin").is_file());
        assert!(tarball
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(&verified.manifest_hash[..12]));

        // Retention window of zero days reaps it on the next tick.
        let reaped = store.retention_sweep().unwrap();
        assert_eq!(reaped, 1);
        assert!(!tarball.exists());
    }
}
