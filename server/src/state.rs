//! Application state: every service constructed once at start-up and
//! passed around explicitly. No module-level singletons.

use crate::config::Config;
use crate::error::ApiError;
use anyhow::{anyhow, Context, Result};
use axum::http::StatusCode;
use chrono::{DateTime, SecondsFormat, Utc};
use ransomeye_alert_core::{
    Alert, AlertBuffer, BufferConfig, DedupConfig, DuplicateFilter, RuleSet,
};
use ransomeye_bundle::{ArtifactStore, BundleVerifier, StoreConfig, VerifierLimits};
use ransomeye_crypto::KeyPair;
use ransomeye_ledger::{AuditLedger, EntryBody};
use ransomeye_registry::{
    ActiveArtifact, ActiveEntry, ActiveInfo, ArtifactRecord, ArtifactRegistry,
};
use ransomeye_validator::{
    Attestor, ChainVerifier, HealthModel, HealthScorer, OrchestratorConfig, RunStore,
    SqliteRecordSource, ValidationOrchestrator,
};
use rusqlite::{params, Connection};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Artifact classes the platform hot-swaps.
pub const KIND_POLICY: &str = "policy";
pub const KIND_MODEL: &str = "model";

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: Config,
    pub keys: Arc<KeyPair>,
    pub verifier: BundleVerifier,
    pub store: ArtifactStore,
    pub registry: ArtifactRegistry,
    pub rulesets: Arc<ActiveArtifact<RuleSet>>,
    pub models: Arc<ActiveArtifact<HealthModel>>,
    pub dedup: Arc<DuplicateFilter>,
    pub buffer: Arc<AlertBuffer>,
    pub ledger: Arc<AuditLedger>,
    pub orchestrator: Arc<ValidationOrchestrator>,
    pub shutdown: broadcast::Sender<()>,
    records_db: PathBuf,
}

impl AppState {
    /// Wire every service from the validated config.
    pub async fn initialize(config: Config) -> Result<SharedState> {
        std::fs::create_dir_all(&config.storage.root)
            .with_context(|| format!("creating storage root {:?}", config.storage.root))?;

        let keys = Arc::new(KeyPair::load_or_generate(
            &config.private_key_path(),
            &config.public_key_path(),
        )?);

        let ledger = Arc::new(AuditLedger::open(&config.audit_log_path(), keys.clone())?);

        let mut store_config = StoreConfig::under(&config.storage.root);
        store_config.archive_retention_days = config.storage.archive_retention_days;
        let store = ArtifactStore::new(store_config).map_err(|e| anyhow!(e.to_string()))?;

        let registry = ArtifactRegistry::open(&config.registry_db_path())
            .map_err(|e| anyhow!(e.to_string()))?;
        let records_db = config.registry_db_path();
        SqliteRecordSource::initialize(&records_db).map_err(|e| anyhow!(e.to_string()))?;

        let verifier = BundleVerifier::new(
            keys.public().clone(),
            VerifierLimits {
                max_uncompressed_bytes: config.bundles.max_uncompressed_bytes,
                max_file_count: config.bundles.max_file_count,
            },
        );

        let dedup = Arc::new(
            DuplicateFilter::new(DedupConfig {
                ttl: Duration::from_secs(config.ingest.dedup_ttl_secs),
                max_entries: config.ingest.dedup_max_entries,
                simhash_capacity: config.ingest.simhash_capacity,
                similarity_threshold: config.ingest.similarity_threshold,
                redis_url: config.ingest.redis_url.clone(),
            })
            .await,
        );

        let buffer = Arc::new(AlertBuffer::start(BufferConfig {
            capacity: config.ingest.buffer_capacity,
            batch_size: config.ingest.buffer_batch_size,
            flush_interval: Duration::from_secs(config.ingest.buffer_flush_secs),
            storage_dir: config.alerts_dir(),
        })?);

        let rulesets = Arc::new(ActiveArtifact::new());
        let models = Arc::new(ActiveArtifact::new());

        let (shutdown, _) = broadcast::channel(4);
        let chain = Arc::new(ChainVerifier::new(
            Arc::new(SqliteRecordSource::new(&records_db)),
            shutdown.clone(),
        ));
        let scorer = HealthScorer::new(Arc::clone(&models));
        let attestor = Arc::new(Attestor::new(
            keys.clone(),
            ledger.clone(),
            RunStore::new(&config.storage.root).map_err(|e| anyhow!(e.to_string()))?,
        ));
        let orchestrator = Arc::new(ValidationOrchestrator::new(
            OrchestratorConfig {
                ingest_url: config.ingest_url(),
                stress_alert_count: config.validator.stress_alert_count,
                incident_wait: Duration::from_secs(config.validator.incident_wait_secs),
                evidence_wait: Duration::from_secs(config.validator.evidence_wait_secs),
            },
            chain,
            scorer,
            attestor,
        ));

        let state = Arc::new(Self {
            keys,
            verifier,
            store,
            registry,
            rulesets,
            models,
            dedup,
            buffer,
            ledger,
            orchestrator,
            shutdown,
            records_db,
            config,
        });

        state.restore_active_artifacts();
        Ok(state)
    }

    /// Reload the in-memory holders from whatever the registry says is
    /// active - used at start-up so a restart resumes the last state.
    fn restore_active_artifacts(&self) {
        for record in self
            .registry
            .list(Some(ransomeye_registry::ArtifactStatus::Active))
            .unwrap_or_default()
        {
            if let Err(e) = self.load_into_memory(&record) {
                warn!(
                    artifact_id = %record.artifact_id,
                    error = %e,
                    "could not restore active artifact"
                );
            }
        }
    }

    fn artifact_kind(record: &ArtifactRecord) -> Option<String> {
        record
            .metadata
            .get("kind")
            .and_then(|v| v.as_str())
            .map(String::from)
    }

    fn active_info(record: &ArtifactRecord) -> ActiveInfo {
        let activated_at: DateTime<Utc> = record
            .activated_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        ActiveInfo {
            artifact_id: record.artifact_id.clone(),
            name: record.name.clone(),
            version: record.version.clone(),
            manifest_hash: record.manifest_hash.clone(),
            activated_at,
        }
    }

    /// Load an activated artifact's payload into its hot-swap slot.
    fn load_into_memory(&self, record: &ArtifactRecord) -> Result<()> {
        match Self::artifact_kind(record).as_deref() {
            Some(KIND_POLICY) => {
                let path = self
                    .store
                    .file_path(&record.manifest_hash, "rules.json")
                    .map_err(|e| anyhow!(e.to_string()))?;
                let bytes = std::fs::read(&path)
                    .with_context(|| format!("reading {}", path.display()))?;
                let ruleset =
                    RuleSet::from_json_bytes(&bytes).map_err(|e| anyhow!(e.to_string()))?;
                info!(
                    artifact_id = %record.artifact_id,
                    rules = ruleset.len(),
                    dropped = ruleset.dropped,
                    "ruleset loaded"
                );
                self.rulesets.swap(Some(ActiveEntry {
                    value: Arc::new(ruleset),
                    info: Self::active_info(record),
                }));
            }
            Some(KIND_MODEL) => {
                let path = self
                    .store
                    .file_path(&record.manifest_hash, "model.json")
                    .map_err(|e| anyhow!(e.to_string()))?;
                let bytes = std::fs::read(&path)
                    .with_context(|| format!("reading {}", path.display()))?;
                let model = HealthModel::from_json_bytes(&bytes)?;
                info!(artifact_id = %record.artifact_id, "scorer model loaded");
                self.models.swap(Some(ActiveEntry {
                    value: Arc::new(model),
                    info: Self::active_info(record),
                }));
            }
            other => {
                warn!(
                    artifact_id = %record.artifact_id,
                    kind = other.unwrap_or("missing"),
                    "artifact has no loadable kind, registry state updated only"
                );
            }
        }
        Ok(())
    }

    /// Activate an artifact: registry transaction, archive the demoted
    /// predecessor, hot-swap the in-memory holder, audit the event.
    pub fn activate_artifact(&self, artifact_id: &str, actor: &str) -> Result<ArtifactRecord, ApiError> {
        let outcome = self.registry.activate(artifact_id)?;

        if let Some(demoted) = &outcome.demoted {
            if let Err(e) = self.store.archive_artifact(
                &demoted.manifest_hash,
                &demoted.name,
                &demoted.manifest_hash,
            ) {
                warn!(
                    artifact_id = %demoted.artifact_id,
                    error = %e,
                    "could not archive demoted artifact"
                );
            }
        }

        self.load_into_memory(&outcome.activated)
            .map_err(|e| ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "artifact_unloadable", e.to_string()))?;

        let body = EntryBody::new("artifact_activated", actor, &outcome.activated.manifest_hash)
            .with("artifact_id", json!(outcome.activated.artifact_id))
            .with("name", json!(outcome.activated.name))
            .with("version", json!(outcome.activated.version))
            .with(
                "demoted",
                json!(outcome.demoted.as_ref().map(|d| d.artifact_id.clone())),
            );
        self.ledger
            .append(body)
            .map_err(|e| ApiError::internal(e.to_string()))?;

        Ok(outcome.activated)
    }

    /// Persist an accepted alert row for the chain verifier to find.
    pub fn insert_alert_row(&self, alert: &Alert) -> Result<(), ApiError> {
        let conn = Connection::open(&self.records_db)
            .map_err(|e| ApiError::internal(e.to_string()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| ApiError::internal(e.to_string()))?;
        conn.execute(
            "INSERT OR IGNORE INTO alerts (alert_id, source, alert_type, target, severity, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                alert.alert_id.to_string(),
                alert.source,
                alert.alert_type,
                alert.target,
                alert.severity.as_str(),
                Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            ],
        )
        .map_err(|e| ApiError::internal(e.to_string()))?;
        Ok(())
    }

    /// Graceful shutdown: stop background workers and drain the buffer.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(());
        self.buffer.shutdown().await;
        info!("server state shut down");
    }
}
