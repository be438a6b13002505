//! Chain verification: bounded polling over downstream record stores.
//!
//! `wait_for_record` re-executes a query with a doubling interval (base
//! 1 s, cap 10 s) until it returns a row or the deadline passes. Every
//! attempt runs against a fresh connection so no snapshot goes stale across
//! a sleep. A shutdown signal aborts the current wait with `cancelled`.

use crate::{Result, ValidatorError};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// A query against the downstream alert/incident/evidence stores.
#[derive(Debug, Clone)]
pub enum RecordQuery {
    AlertById(String),
    IncidentById(String),
    /// The incident derived from an alert - the first link of the chain.
    IncidentByAlert(String),
    EvidenceByIncident(String),
    EvidenceById {
        evidence_id: String,
        incident_id: Option<String>,
    },
}

impl RecordQuery {
    fn describe(&self) -> String {
        match self {
            RecordQuery::AlertById(id) => format!("alert {id}"),
            RecordQuery::IncidentById(id) => format!("incident {id}"),
            RecordQuery::IncidentByAlert(id) => format!("incident for alert {id}"),
            RecordQuery::EvidenceByIncident(id) => format!("evidence for incident {id}"),
            RecordQuery::EvidenceById { evidence_id, .. } => format!("evidence {evidence_id}"),
        }
    }
}

/// Abstract record store the verifier polls. One `fetch` is one fresh
/// transaction.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch(&self, query: &RecordQuery) -> Result<Option<serde_json::Value>>;
}

/// Structured chain-integrity outcome.
#[derive(Debug, Clone, Serialize)]
pub struct ChainReport {
    pub alert_exists: bool,
    pub incident_exists: bool,
    /// `None` when the caller explicitly omitted evidence from the check.
    pub evidence_exists: Option<bool>,
    pub chain_complete: bool,
}

/// Polls a record source and proves alert -> incident -> evidence linkage.
pub struct ChainVerifier {
    source: std::sync::Arc<dyn RecordSource>,
    shutdown: broadcast::Sender<()>,
}

impl ChainVerifier {
    pub fn new(source: std::sync::Arc<dyn RecordSource>, shutdown: broadcast::Sender<()>) -> Self {
        Self { source, shutdown }
    }

    /// Repeatedly execute `query` until it yields a record, doubling the
    /// sleep between attempts from 1 s up to 10 s. Raises `timed_out` when
    /// the deadline passes and `cancelled` on shutdown.
    pub async fn wait_for_record(
        &self,
        query: &RecordQuery,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        let started = Instant::now();
        let mut interval = Duration::from_secs(1);
        let max_interval = Duration::from_secs(10);
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            match self.source.fetch(query).await {
                Ok(Some(record)) => {
                    debug!(query = %query.describe(), elapsed_ms = started.elapsed().as_millis() as u64, "record found");
                    return Ok(record);
                }
                Ok(None) => {}
                // A transient store error behaves like an empty result; the
                // deadline still bounds the total wait.
                Err(e) => warn!(query = %query.describe(), error = %e, "record fetch failed"),
            }

            let remaining = timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(ValidatorError::TimedOut {
                    what: query.describe(),
                    timeout_secs: timeout.as_secs(),
                });
            }

            tokio::select! {
                _ = tokio::time::sleep(interval.min(remaining)) => {}
                _ = shutdown_rx.recv() => {
                    info!(query = %query.describe(), "wait cancelled by shutdown");
                    return Err(ValidatorError::Cancelled);
                }
            }
            interval = (interval * 2).min(max_interval);
        }
    }

    /// Run the three dependent waits and report structured booleans.
    /// Evidence is required unless explicitly omitted.
    pub async fn verify_chain(
        &self,
        alert_id: &str,
        incident_id: &str,
        evidence_id: Option<&str>,
        timeout: Duration,
    ) -> Result<ChainReport> {
        let alert_exists = self
            .wait_for_record(&RecordQuery::AlertById(alert_id.to_string()), timeout)
            .await
            .is_ok();
        let incident_exists = alert_exists
            && self
                .wait_for_record(&RecordQuery::IncidentById(incident_id.to_string()), timeout)
                .await
                .is_ok();
        let evidence_exists = match evidence_id {
            None => None,
            Some(id) => Some(
                incident_exists
                    && self
                        .wait_for_record(
                            &RecordQuery::EvidenceById {
                                evidence_id: id.to_string(),
                                incident_id: Some(incident_id.to_string()),
                            },
                            timeout,
                        )
                        .await
                        .is_ok(),
            ),
        };

        let chain_complete = alert_exists && incident_exists && evidence_exists.unwrap_or(true);
        Ok(ChainReport {
            alert_exists,
            incident_exists,
            evidence_exists,
            chain_complete,
        })
    }
}

/// SQLite-backed record source over the platform's relational store.
///
/// Opens a fresh connection per fetch - one implicit transaction per
/// query, so a poll never observes a stale snapshot.
#[derive(Debug, Clone)]
pub struct SqliteRecordSource {
    db_path: PathBuf,
}

impl SqliteRecordSource {
    pub fn new(db_path: &Path) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
        }
    }

    /// Create the downstream tables when absent. The ingest glue writes
    /// `alerts`; the incident and evidence tables are populated by the
    /// kill-chain and forensic collaborators.
    pub fn initialize(db_path: &Path) -> Result<()> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path).map_err(|e| ValidatorError::Source(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS alerts (
                alert_id    TEXT PRIMARY KEY,
                source      TEXT NOT NULL,
                alert_type  TEXT NOT NULL,
                target      TEXT NOT NULL,
                severity    TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS incidents (
                incident_id TEXT PRIMARY KEY,
                alert_id    TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_incidents_alert ON incidents(alert_id);
            CREATE TABLE IF NOT EXISTS evidence (
                evidence_id      TEXT PRIMARY KEY,
                incident_id      TEXT NOT NULL,
                evidence_type    TEXT,
                file_hash_sha256 TEXT,
                source_host      TEXT,
                collected_at     TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_evidence_incident ON evidence(incident_id);",
        )
        .map_err(|e| ValidatorError::Source(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl RecordSource for SqliteRecordSource {
    async fn fetch(&self, query: &RecordQuery) -> Result<Option<serde_json::Value>> {
        let db_path = self.db_path.clone();
        let query = query.clone();

        tokio::task::spawn_blocking(move || -> Result<Option<serde_json::Value>> {
            let conn =
                Connection::open(&db_path).map_err(|e| ValidatorError::Source(e.to_string()))?;
            let row = match &query {
                RecordQuery::AlertById(id) => fetch_row(
                    &conn,
                    "SELECT alert_id, source, alert_type, target, severity, created_at
                     FROM alerts WHERE alert_id = ?1",
                    &[id],
                )?,
                RecordQuery::IncidentById(id) => fetch_row(
                    &conn,
                    "SELECT incident_id, alert_id, created_at FROM incidents WHERE incident_id = ?1",
                    &[id],
                )?,
                RecordQuery::IncidentByAlert(alert_id) => fetch_row(
                    &conn,
                    "SELECT incident_id, alert_id, created_at FROM incidents WHERE alert_id = ?1",
                    &[alert_id],
                )?,
                RecordQuery::EvidenceByIncident(incident_id) => fetch_row(
                    &conn,
                    "SELECT evidence_id, incident_id, evidence_type, file_hash_sha256,
                            source_host, collected_at
                     FROM evidence WHERE incident_id = ?1",
                    &[incident_id],
                )?,
                RecordQuery::EvidenceById {
                    evidence_id,
                    incident_id: Some(incident_id),
                } => fetch_row(
                    &conn,
                    "SELECT evidence_id, incident_id, evidence_type, file_hash_sha256,
                            source_host, collected_at
                     FROM evidence WHERE evidence_id = ?1 AND incident_id = ?2",
                    &[evidence_id, incident_id],
                )?,
                RecordQuery::EvidenceById {
                    evidence_id,
                    incident_id: None,
                } => fetch_row(
                    &conn,
                    "SELECT evidence_id, incident_id, evidence_type, file_hash_sha256,
                            source_host, collected_at
                     FROM evidence WHERE evidence_id = ?1",
                    &[evidence_id],
                )?,
            };
            Ok(row)
        })
        .await
        .map_err(|e| ValidatorError::Source(e.to_string()))?
    }
}

fn fetch_row(
    conn: &Connection,
    sql: &str,
    args: &[&String],
) -> Result<Option<serde_json::Value>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| ValidatorError::Source(e.to_string()))?;
    let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

    let value = match args {
        [a] => stmt.query_row(params![a], |row| row_to_json(row, &column_names)),
        [a, b] => stmt.query_row(params![a, b], |row| row_to_json(row, &column_names)),
        _ => unreachable!("record queries take one or two parameters"),
    };
    value
        .optional()
        .map_err(|e| ValidatorError::Source(e.to_string()))
}

fn row_to_json(
    row: &rusqlite::Row<'_>,
    column_names: &[String],
) -> rusqlite::Result<serde_json::Value> {
    let mut map = serde_json::Map::new();
    for (i, name) in column_names.iter().enumerate() {
        let value: Option<String> = row.get(i)?;
        map.insert(
            name.clone(),
            value
                .map(serde_json::Value::String)
                .unwrap_or(serde_json::Value::Null),
        );
    }
    Ok(serde_json::Value::Object(map))
}
