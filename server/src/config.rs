//! Server configuration.
//!
//! One `Config` struct covers every service; it loads from a TOML file,
//! applies `RANSOMEYE_*` environment overrides and validates before any
//! service is constructed. Services receive their slice of the config by
//! value - there is no global configuration state.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub ingest: IngestSection,
    #[serde(default)]
    pub bundles: BundleSection,
    #[serde(default)]
    pub validator: ValidatorSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    /// Root of the persisted state layout (`registry.db`, `artifacts/`,
    /// `runs/`, `audit.log`, `keys/`).
    pub root: PathBuf,
    /// Days archived artifact tarballs are kept.
    pub archive_retention_days: i64,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/var/lib/ransomeye"),
            archive_retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    pub listen_addr: String,
    /// Maintenance tick interval (retention sweeps, dedup cleanup).
    pub poll_interval_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            poll_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSection {
    pub dedup_ttl_secs: u64,
    pub dedup_max_entries: usize,
    pub simhash_capacity: usize,
    pub similarity_threshold: u32,
    /// Optional Redis URL for the dedup store.
    pub redis_url: Option<String>,
    pub buffer_capacity: usize,
    pub buffer_batch_size: usize,
    pub buffer_flush_secs: u64,
}

impl Default for IngestSection {
    fn default() -> Self {
        Self {
            dedup_ttl_secs: 3600,
            dedup_max_entries: 10_000,
            simhash_capacity: 1_000,
            similarity_threshold: 3,
            redis_url: None,
            buffer_capacity: 2_000,
            buffer_batch_size: 1_000,
            buffer_flush_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleSection {
    pub max_uncompressed_bytes: u64,
    pub max_file_count: usize,
    /// Upper bound on one bundle verification, end to end.
    pub max_verify_secs: u64,
}

impl Default for BundleSection {
    fn default() -> Self {
        Self {
            max_uncompressed_bytes: 5 * 1024 * 1024 * 1024,
            max_file_count: 50_000,
            max_verify_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorSection {
    /// Ingest endpoint the injector drives; defaults to this server.
    pub ingest_url: Option<String>,
    pub stress_alert_count: usize,
    /// Wait budget for the downstream incident record.
    pub incident_wait_secs: u64,
    /// Wait budget for the forensic evidence record.
    pub evidence_wait_secs: u64,
}

impl Default for ValidatorSection {
    fn default() -> Self {
        Self {
            ingest_url: None,
            stress_alert_count: 10,
            incident_wait_secs: 60,
            evidence_wait_secs: 90,
        }
    }
}

impl Config {
    /// Load from an optional TOML file, then apply environment overrides
    /// and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .map_err(|e| anyhow!("cannot read config {}: {e}", path.display()))?;
                toml::from_str(&content)
                    .map_err(|e| anyhow!("cannot parse config {}: {e}", path.display()))?
            }
            None => Config::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(root) = std::env::var("RANSOMEYE_STORAGE_ROOT") {
            self.storage.root = PathBuf::from(root);
        }
        if let Ok(addr) = std::env::var("RANSOMEYE_LISTEN_ADDR") {
            self.server.listen_addr = addr;
        }
        if let Ok(url) = std::env::var("RANSOMEYE_REDIS_URL") {
            self.ingest.redis_url = Some(url);
        }
        if let Ok(ttl) = std::env::var("RANSOMEYE_DEDUP_TTL_SECS") {
            if let Ok(ttl) = ttl.parse() {
                self.ingest.dedup_ttl_secs = ttl;
            }
        }
        if let Ok(url) = std::env::var("RANSOMEYE_INGEST_URL") {
            self.validator.ingest_url = Some(url);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.ingest.buffer_capacity == 0 || self.ingest.buffer_batch_size == 0 {
            return Err(anyhow!("buffer capacity and batch size must be non-zero"));
        }
        if self.ingest.similarity_threshold > 64 {
            return Err(anyhow!("similarity threshold cannot exceed 64 bits"));
        }
        if self.bundles.max_file_count == 0 || self.bundles.max_uncompressed_bytes == 0 {
            return Err(anyhow!("bundle limits must be non-zero"));
        }
        if self.server.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(anyhow!(
                "listen_addr {:?} is not a socket address",
                self.server.listen_addr
            ));
        }
        Ok(())
    }

    // Persisted state layout (spec'd paths under the storage root).

    pub fn registry_db_path(&self) -> PathBuf {
        self.storage.root.join("registry.db")
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.storage.root.join("audit.log")
    }

    pub fn private_key_path(&self) -> PathBuf {
        self.storage.root.join("keys/sign_key.pem")
    }

    pub fn public_key_path(&self) -> PathBuf {
        self.storage.root.join("keys/sign_key.pub")
    }

    pub fn alerts_dir(&self) -> PathBuf {
        self.storage.root.join("alerts")
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.storage.root.join("uploads")
    }

    /// The ingest endpoint the validator's injector targets.
    pub fn ingest_url(&self) -> String {
        match &self.validator.ingest_url {
            Some(url) => url.clone(),
            None => format!("http://{}/ingest", self.server.listen_addr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_partial_toml_overlays_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[storage]\nroot = \"/tmp/re\"\narchive_retention_days = 7\n\n[ingest]\ndedup_ttl_secs = 60\ndedup_max_entries = 100\nsimhash_capacity = 10\nsimilarity_threshold = 2\nbuffer_capacity = 10\nbuffer_batch_size = 5\nbuffer_flush_secs = 1\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.storage.root, PathBuf::from("/tmp/re"));
        assert_eq!(config.ingest.dedup_ttl_secs, 60);
        // Untouched sections keep their defaults.
        assert_eq!(config.server.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.bundles.max_verify_secs, 60);
    }

    #[test]
    fn test_bad_listen_addr_rejected() {
        let mut config = Config::default();
        config.server.listen_addr = "not-an-addr".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ingest_url_defaults_to_listen_addr() {
        let config = Config::default();
        assert_eq!(config.ingest_url(), "http://127.0.0.1:8080/ingest");
    }
}
