//! Bundle manifest shape and parsing.

use crate::{BundleError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Free-form metadata block; `name` and `version` are required, everything
/// else rides along untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManifestMetadata {
    pub name: String,
    pub version: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Parsed `manifest.json`.
///
/// `files` maps bundle-relative paths to the SHA-256 of their content. The
/// artifact identity hash is the SHA-256 of the manifest bytes as delivered
/// on the wire, not of any re-serialization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BundleManifest {
    pub metadata: ManifestMetadata,
    pub files: BTreeMap<String, String>,
}

impl BundleManifest {
    /// Parse manifest bytes, surfacing malformed JSON as a bundle rejection.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| BundleError::ArchiveMalformed(format!("manifest.json: {e}")))
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn version(&self) -> &str {
        &self.metadata.version
    }
}
