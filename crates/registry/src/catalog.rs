//! SQLite-backed artifact catalog.
//!
//! Every write runs in one transaction; a failure rolls back and leaves the
//! previous state intact. `manifest_hash` carries a UNIQUE constraint, so a
//! duplicate register resolves to the existing row instead of a new one.

use crate::{RegistryError, Result};
use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

/// Artifact lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    Inactive,
    Active,
    Deprecated,
}

impl ArtifactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactStatus::Inactive => "inactive",
            ArtifactStatus::Active => "active",
            ArtifactStatus::Deprecated => "deprecated",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "inactive" => Ok(ArtifactStatus::Inactive),
            "active" => Ok(ArtifactStatus::Active),
            "deprecated" => Ok(ArtifactStatus::Deprecated),
            other => Err(RegistryError::Database(format!("bad status {other:?}"))),
        }
    }
}

/// One catalog row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub artifact_id: String,
    pub name: String,
    pub version: String,
    pub manifest_hash: String,
    pub file_path: String,
    pub status: ArtifactStatus,
    pub metadata: serde_json::Value,
    pub uploaded_at: String,
    pub activated_at: Option<String>,
    pub uploaded_by: Option<String>,
}

/// Input for [`ArtifactRegistry::register`].
#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub name: String,
    pub version: String,
    pub manifest_hash: String,
    pub file_path: String,
    pub metadata: serde_json::Value,
    pub uploaded_by: Option<String>,
}

/// Result of a register call; `created` is false when the manifest hash was
/// already present and the existing id is returned.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterOutcome {
    pub artifact_id: String,
    pub created: bool,
}

/// Result of an activate call; `demoted` is the previously active artifact
/// of the same name, when there was one.
#[derive(Debug, Clone)]
pub struct ActivationOutcome {
    pub activated: ArtifactRecord,
    pub demoted: Option<ArtifactRecord>,
}

/// Transactional artifact catalog. Cheap to clone; writers serialise on the
/// shared connection, readers see committed state only.
#[derive(Clone)]
pub struct ArtifactRegistry {
    conn: Arc<Mutex<Connection>>,
}

impl ArtifactRegistry {
    /// Open (or create) the catalog database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RegistryError::Database(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory catalog for tests and ephemeral deployments.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS artifacts (
                artifact_id   TEXT PRIMARY KEY,
                name          TEXT NOT NULL,
                version       TEXT NOT NULL,
                manifest_hash TEXT NOT NULL UNIQUE,
                file_path     TEXT NOT NULL,
                status        TEXT NOT NULL DEFAULT 'inactive',
                metadata_json TEXT NOT NULL DEFAULT '{}',
                uploaded_at   TEXT NOT NULL,
                activated_at  TEXT,
                uploaded_by   TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_artifacts_name ON artifacts(name);
            CREATE INDEX IF NOT EXISTS idx_artifacts_status ON artifacts(status);",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Register a verified artifact as `inactive`. Idempotent on
    /// `manifest_hash`: a duplicate returns the existing id.
    pub fn register(&self, new: NewArtifact) -> Result<RegisterOutcome> {
        let mut conn = self.conn.lock().expect("registry lock poisoned");
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(existing) = tx
            .query_row(
                "SELECT artifact_id FROM artifacts WHERE manifest_hash = ?1",
                params![new.manifest_hash],
                |row| row.get::<_, String>(0),
            )
            .optional()?
        {
            warn!(
                manifest_hash = %new.manifest_hash,
                artifact_id = %existing,
                "duplicate register resolved to existing artifact"
            );
            return Ok(RegisterOutcome {
                artifact_id: existing,
                created: false,
            });
        }

        let artifact_id = Uuid::new_v4().to_string();
        let uploaded_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let metadata_json = serde_json::to_string(&new.metadata)
            .map_err(|e| RegistryError::Database(e.to_string()))?;

        tx.execute(
            "INSERT INTO artifacts
                (artifact_id, name, version, manifest_hash, file_path, status,
                 metadata_json, uploaded_at, uploaded_by)
             VALUES (?1, ?2, ?3, ?4, ?5, 'inactive', ?6, ?7, ?8)",
            params![
                artifact_id,
                new.name,
                new.version,
                new.manifest_hash,
                new.file_path,
                metadata_json,
                uploaded_at,
                new.uploaded_by,
            ],
        )?;
        tx.commit()?;

        info!(artifact_id = %artifact_id, name = %new.name, version = %new.version, "artifact registered");
        Ok(RegisterOutcome {
            artifact_id,
            created: true,
        })
    }

    /// Promote an artifact to `active`, demoting any currently active
    /// artifact of the same name in the same transaction. Idempotent when
    /// the artifact is already active.
    pub fn activate(&self, artifact_id: &str) -> Result<ActivationOutcome> {
        let mut conn = self.conn.lock().expect("registry lock poisoned");
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let record = query_by_id(&tx, artifact_id)?
            .ok_or_else(|| RegistryError::UnknownId(artifact_id.to_string()))?;

        if record.status == ArtifactStatus::Active {
            return Ok(ActivationOutcome {
                activated: record,
                demoted: None,
            });
        }

        let demoted = tx
            .query_row(
                "SELECT * FROM artifacts WHERE name = ?1 AND status = 'active'",
                params![record.name],
                record_from_row,
            )
            .optional()?;

        tx.execute(
            "UPDATE artifacts SET status = 'inactive', activated_at = NULL
             WHERE name = ?1 AND status = 'active'",
            params![record.name],
        )?;

        let activated_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        tx.execute(
            "UPDATE artifacts SET status = 'active', activated_at = ?1 WHERE artifact_id = ?2",
            params![activated_at, artifact_id],
        )?;
        let activated = query_by_id(&tx, artifact_id)?
            .ok_or_else(|| RegistryError::UnknownId(artifact_id.to_string()))?;
        tx.commit()?;

        info!(
            artifact_id,
            name = %activated.name,
            demoted = demoted.as_ref().map(|d| d.artifact_id.as_str()).unwrap_or("none"),
            "artifact activated"
        );
        Ok(ActivationOutcome { activated, demoted })
    }

    /// Demote an artifact to `inactive`.
    pub fn deactivate(&self, artifact_id: &str) -> Result<ArtifactRecord> {
        let mut conn = self.conn.lock().expect("registry lock poisoned");
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let record = query_by_id(&tx, artifact_id)?
            .ok_or_else(|| RegistryError::UnknownId(artifact_id.to_string()))?;
        tx.execute(
            "UPDATE artifacts SET status = 'inactive', activated_at = NULL WHERE artifact_id = ?1",
            params![artifact_id],
        )?;
        let updated = query_by_id(&tx, artifact_id)?
            .ok_or_else(|| RegistryError::UnknownId(artifact_id.to_string()))?;
        tx.commit()?;

        info!(artifact_id, name = %record.name, "artifact deactivated");
        Ok(updated)
    }

    /// The active artifact for `name`, if any.
    pub fn get_active(&self, name: &str) -> Result<Option<ArtifactRecord>> {
        let conn = self.conn.lock().expect("registry lock poisoned");
        conn.query_row(
            "SELECT * FROM artifacts WHERE name = ?1 AND status = 'active'",
            params![name],
            record_from_row,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn get_by_id(&self, artifact_id: &str) -> Result<Option<ArtifactRecord>> {
        let conn = self.conn.lock().expect("registry lock poisoned");
        query_by_id(&conn, artifact_id)
    }

    /// Most recently uploaded artifact with this name.
    pub fn get_by_name(&self, name: &str) -> Result<Option<ArtifactRecord>> {
        let conn = self.conn.lock().expect("registry lock poisoned");
        conn.query_row(
            "SELECT * FROM artifacts WHERE name = ?1 ORDER BY uploaded_at DESC LIMIT 1",
            params![name],
            record_from_row,
        )
        .optional()
        .map_err(Into::into)
    }

    /// All artifacts, optionally filtered by status, newest upload first.
    pub fn list(&self, status: Option<ArtifactStatus>) -> Result<Vec<ArtifactRecord>> {
        let conn = self.conn.lock().expect("registry lock poisoned");
        let mut out = Vec::new();
        match status {
            Some(status) => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM artifacts WHERE status = ?1 ORDER BY uploaded_at DESC",
                )?;
                let rows = stmt.query_map(params![status.as_str()], record_from_row)?;
                for row in rows {
                    out.push(row?);
                }
            }
            None => {
                let mut stmt =
                    conn.prepare("SELECT * FROM artifacts ORDER BY uploaded_at DESC")?;
                let rows = stmt.query_map([], record_from_row)?;
                for row in rows {
                    out.push(row?);
                }
            }
        }
        Ok(out)
    }

    /// Delete a row; refused while the artifact is active.
    pub fn delete(&self, artifact_id: &str) -> Result<ArtifactRecord> {
        let mut conn = self.conn.lock().expect("registry lock poisoned");
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let record = query_by_id(&tx, artifact_id)?
            .ok_or_else(|| RegistryError::UnknownId(artifact_id.to_string()))?;
        if record.status == ArtifactStatus::Active {
            return Err(RegistryError::ActiveDelete(artifact_id.to_string()));
        }
        tx.execute(
            "DELETE FROM artifacts WHERE artifact_id = ?1",
            params![artifact_id],
        )?;
        tx.commit()?;

        info!(artifact_id, name = %record.name, "artifact deleted");
        Ok(record)
    }
}

fn query_by_id(conn: &Connection, artifact_id: &str) -> Result<Option<ArtifactRecord>> {
    conn.query_row(
        "SELECT * FROM artifacts WHERE artifact_id = ?1",
        params![artifact_id],
        record_from_row,
    )
    .optional()
    .map_err(Into::into)
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<ArtifactRecord> {
    let status_str: String = row.get("status")?;
    let metadata_json: String = row.get("metadata_json")?;
    Ok(ArtifactRecord {
        artifact_id: row.get("artifact_id")?,
        name: row.get("name")?,
        version: row.get("version")?,
        manifest_hash: row.get("manifest_hash")?,
        file_path: row.get("file_path")?,
        status: ArtifactStatus::parse(&status_str).unwrap_or(ArtifactStatus::Inactive),
        metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::Value::Null),
        uploaded_at: row.get("uploaded_at")?,
        activated_at: row.get("activated_at")?,
        uploaded_by: row.get("uploaded_by")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_artifact(name: &str, hash: &str) -> NewArtifact {
        NewArtifact {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            manifest_hash: hash.to_string(),
            file_path: format!("/artifacts/{hash}"),
            metadata: json!({"kind": "model"}),
            uploaded_by: Some("operator".to_string()),
        }
    }

    #[test]
    fn test_register_activate_replace() {
        let registry = ArtifactRegistry::open_in_memory().unwrap();

        let a = registry.register(new_artifact("detector", "hash-a")).unwrap();
        let b = registry.register(new_artifact("detector", "hash-b")).unwrap();
        assert!(a.created && b.created);

        registry.activate(&a.artifact_id).unwrap();
        let outcome = registry.activate(&b.artifact_id).unwrap();
        assert_eq!(
            outcome.demoted.as_ref().map(|d| d.artifact_id.as_str()),
            Some(a.artifact_id.as_str())
        );

        let active = registry.get_active("detector").unwrap().unwrap();
        assert_eq!(active.artifact_id, b.artifact_id);

        let a_record = registry.get_by_id(&a.artifact_id).unwrap().unwrap();
        assert_eq!(a_record.status, ArtifactStatus::Inactive);
        assert_eq!(a_record.activated_at, None);
    }

    #[test]
    fn test_duplicate_hash_returns_existing_id() {
        let registry = ArtifactRegistry::open_in_memory().unwrap();

        let first = registry.register(new_artifact("detector", "hash-x")).unwrap();
        let second = registry
            .register(new_artifact("detector", "hash-x"))
            .unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.artifact_id, second.artifact_id);
        assert_eq!(registry.list(None).unwrap().len(), 1);
    }

    #[test]
    fn test_single_active_per_name_across_interleavings() {
        let registry = ArtifactRegistry::open_in_memory().unwrap();

        let mut ids = Vec::new();
        for i in 0..4 {
            let outcome = registry
                .register(new_artifact("policy", &format!("hash-{i}")))
                .unwrap();
            ids.push(outcome.artifact_id);
        }
        let other = registry.register(new_artifact("model", "hash-m")).unwrap();

        // Interleave activations across both names.
        registry.activate(&ids[0]).unwrap();
        registry.activate(&other.artifact_id).unwrap();
        registry.activate(&ids[2]).unwrap();
        registry.activate(&ids[1]).unwrap();
        registry.activate(&ids[3]).unwrap();

        let active = registry.list(Some(ArtifactStatus::Active)).unwrap();
        let policy_active: Vec<_> = active.iter().filter(|r| r.name == "policy").collect();
        assert_eq!(policy_active.len(), 1);
        assert_eq!(policy_active[0].artifact_id, ids[3]);
        assert!(active.iter().any(|r| r.name == "model"));
    }

    #[test]
    fn test_activate_is_idempotent() {
        let registry = ArtifactRegistry::open_in_memory().unwrap();
        let reg = registry.register(new_artifact("detector", "hash-1")).unwrap();

        registry.activate(&reg.artifact_id).unwrap();
        let again = registry.activate(&reg.artifact_id).unwrap();
        assert!(again.demoted.is_none());
        assert_eq!(again.activated.status, ArtifactStatus::Active);
    }

    #[test]
    fn test_delete_refuses_active() {
        let registry = ArtifactRegistry::open_in_memory().unwrap();
        let reg = registry.register(new_artifact("detector", "hash-1")).unwrap();
        registry.activate(&reg.artifact_id).unwrap();

        let err = registry.delete(&reg.artifact_id).unwrap_err();
        assert_eq!(err.kind(), "active_delete");

        registry.deactivate(&reg.artifact_id).unwrap();
        registry.delete(&reg.artifact_id).unwrap();
        assert!(registry.get_by_id(&reg.artifact_id).unwrap().is_none());
    }

    #[test]
    fn test_unknown_id_rejected() {
        let registry = ArtifactRegistry::open_in_memory().unwrap();
        let err = registry.activate("no-such-id").unwrap_err();
        assert_eq!(err.kind(), "unknown_id");
    }

    #[test]
    fn test_get_by_name_returns_latest() {
        let registry = ArtifactRegistry::open_in_memory().unwrap();
        registry.register(new_artifact("detector", "hash-1")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let newer = registry.register(new_artifact("detector", "hash-2")).unwrap();

        let latest = registry.get_by_name("detector").unwrap().unwrap();
        assert_eq!(latest.artifact_id, newer.artifact_id);
    }
}
