//! Bundle assembly for operator tooling and test harnesses.
//!
//! Produces exactly what the verifier expects: canonical `manifest.json`,
//! a detached base64 RSA-PSS `manifest.sig` over those bytes, and the
//! payload files.

use crate::manifest::{BundleManifest, ManifestMetadata};
use crate::{BundleError, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use ransomeye_crypto::{canonical_json_bytes, hash_bytes, hash_file, sign_base64};
use rsa::RsaPrivateKey;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use tracing::info;

/// Builds signed bundle archives from a source directory.
#[derive(Debug)]
pub struct BundleBuilder {
    metadata: ManifestMetadata,
}

impl BundleBuilder {
    pub fn new(metadata: ManifestMetadata) -> Self {
        Self { metadata }
    }

    /// Hash every file under `src_dir`, write the signed archive to
    /// `out_path` and return the manifest hash (the artifact identity).
    pub fn build(
        self,
        src_dir: &Path,
        signing_key: &RsaPrivateKey,
        out_path: &Path,
    ) -> Result<String> {
        let mut files = BTreeMap::new();
        let mut paths = Vec::new();
        collect_files(src_dir, src_dir, &mut paths)?;
        for rel in &paths {
            let digest = hash_file(&src_dir.join(rel))?;
            files.insert(rel.clone(), digest);
        }

        let manifest = BundleManifest {
            metadata: self.metadata,
            files,
        };
        let manifest_value = serde_json::to_value(&manifest)
            .map_err(|e| BundleError::ArchiveMalformed(e.to_string()))?;
        let manifest_bytes = canonical_json_bytes(&manifest_value)?;
        let signature_b64 = sign_base64(signing_key, &manifest_bytes)?;

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let out = File::create(out_path)?;
        let enc = GzEncoder::new(out, Compression::default());
        let mut builder = tar::Builder::new(enc);

        append_entry(&mut builder, "manifest.json", &manifest_bytes)?;
        append_entry(&mut builder, "manifest.sig", signature_b64.as_bytes())?;
        for rel in &paths {
            let data = std::fs::read(src_dir.join(rel))?;
            append_entry(&mut builder, rel, &data)?;
        }
        builder
            .into_inner()
            .map_err(|e| BundleError::ArchiveMalformed(e.to_string()))?
            .finish()?;

        let manifest_hash = hash_bytes(&manifest_bytes);
        info!(
            bundle = %out_path.display(),
            manifest_hash = %manifest_hash,
            files = paths.len(),
            "bundle built and signed"
        );
        Ok(manifest_hash)
    }
}

fn append_entry<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    path: &str,
    data: &[u8],
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, path, data)
        .map_err(|e| BundleError::ArchiveMalformed(e.to_string()))?;
    Ok(())
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    for dent in std::fs::read_dir(dir)? {
        let dent = dent?;
        let path = dent.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else {
            let rel = path
                .strip_prefix(root)
                .map_err(|_| BundleError::PathEscape(path.display().to_string()))?
                .to_string_lossy()
                .into_owned();
            out.push(rel);
        }
    }
    out.sort();
    Ok(())
}
