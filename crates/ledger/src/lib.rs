// Audit Ledger - append-only signed event log
// Each line carries the hash of the previous entry, forming a verifiable chain

//! # Audit Ledger
//!
//! File-backed, newline-delimited JSON. Every record holds the previous
//! record's hash, `entry_hash = SHA-256(previous_hash || canonical(body))`,
//! and an RSA-PSS signature over the canonical body bytes. History is never
//! truncated or rewritten; a broken link is surfaced, not repaired.

use chrono::{SecondsFormat, Utc};
use ransomeye_crypto::{canonical_json_bytes, sign_base64, verify_base64, CryptoError, KeyPair};
use rsa::RsaPublicKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger chain broken at entry {index}: {reason}")]
    ChainBroken { index: usize, reason: String },
    #[error("malformed ledger line {index}: {reason}")]
    Malformed { index: usize, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// The signed portion of a ledger record.
///
/// `timestamp` is RFC 3339 UTC with a trailing `Z`; `content_digest` is the
/// SHA-256 of whatever object the event refers to (manifest, run document).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntryBody {
    pub timestamp: String,
    pub event_type: String,
    pub actor: String,
    pub content_digest: String,
    #[serde(flatten)]
    pub details: BTreeMap<String, serde_json::Value>,
}

impl EntryBody {
    pub fn new(event_type: &str, actor: &str, content_digest: &str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event_type: event_type.to_string(),
            actor: actor.to_string(),
            content_digest: content_digest.to_string(),
            details: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: serde_json::Value) -> Self {
        self.details.insert(key.to_string(), value);
        self
    }
}

/// One line of the ledger file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub previous_hash: Option<String>,
    pub body: EntryBody,
    pub entry_hash: String,
    pub signature: String,
}

/// Append-only signed ledger. Appends are serialised by a per-handle lock
/// and fsynced before returning.
pub struct AuditLedger {
    path: PathBuf,
    keys: Arc<KeyPair>,
    state: Mutex<LedgerState>,
}

struct LedgerState {
    previous_hash: Option<String>,
}

impl AuditLedger {
    /// Open (or create) the ledger, seeding the chain head from the last
    /// line of the file.
    pub fn open(path: &Path, keys: Arc<KeyPair>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let previous_hash = last_entry_hash(path)?;
        debug!(path = %path.display(), head = ?previous_hash, "audit ledger opened");
        Ok(Self {
            path: path.to_path_buf(),
            keys,
            state: Mutex::new(LedgerState { previous_hash }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sign and append one entry; returns the written record.
    pub fn append(&self, body: EntryBody) -> Result<LedgerRecord> {
        let mut state = self.state.lock().expect("ledger lock poisoned");

        let body_value = serde_json::to_value(&body).map_err(|e| LedgerError::Malformed {
            index: 0,
            reason: e.to_string(),
        })?;
        let body_bytes = canonical_json_bytes(&body_value)?;
        let entry_hash = chain_hash(state.previous_hash.as_deref(), &body_bytes);
        let signature = sign_base64(self.keys.private(), &body_bytes)?;

        let record = LedgerRecord {
            previous_hash: state.previous_hash.clone(),
            body,
            entry_hash: entry_hash.clone(),
            signature,
        };

        let line = serde_json::to_string(&record).map_err(|e| LedgerError::Malformed {
            index: 0,
            reason: e.to_string(),
        })?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;

        state.previous_hash = Some(entry_hash);
        info!(event_type = %record.body.event_type, entry_hash = %record.entry_hash, "ledger entry appended");
        Ok(record)
    }

    /// Read the newest `limit` records, newest first.
    pub fn entries(&self, limit: usize) -> Result<Vec<LedgerRecord>> {
        let mut records = read_all(&self.path)?;
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }

    /// Re-read the whole file, recomputing every hash and verifying every
    /// signature and chain link. Returns the number of verified entries.
    pub fn verify_chain(&self, public_key: &RsaPublicKey) -> Result<usize> {
        let records = read_all(&self.path)?;
        let mut previous: Option<String> = None;

        for (index, record) in records.iter().enumerate() {
            if record.previous_hash != previous {
                return Err(LedgerError::ChainBroken {
                    index,
                    reason: format!(
                        "previous_hash {:?} does not match prior entry {:?}",
                        record.previous_hash, previous
                    ),
                });
            }

            let body_value =
                serde_json::to_value(&record.body).map_err(|e| LedgerError::Malformed {
                    index,
                    reason: e.to_string(),
                })?;
            let body_bytes = canonical_json_bytes(&body_value)?;
            let expected = chain_hash(record.previous_hash.as_deref(), &body_bytes);
            if expected != record.entry_hash {
                return Err(LedgerError::ChainBroken {
                    index,
                    reason: format!("entry_hash {} != recomputed {expected}", record.entry_hash),
                });
            }

            verify_base64(public_key, &body_bytes, &record.signature).map_err(|_| {
                LedgerError::ChainBroken {
                    index,
                    reason: "signature verification failed".to_string(),
                }
            })?;

            previous = Some(record.entry_hash.clone());
        }
        Ok(records.len())
    }
}

fn chain_hash(previous: Option<&str>, body_bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    if let Some(prev) = previous {
        hasher.update(prev.as_bytes());
    }
    hasher.update(body_bytes);
    hex::encode(hasher.finalize())
}

fn last_entry_hash(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut last: Option<String> = None;
    for line in reader.lines() {
        let line = line?;
        if !line.trim().is_empty() {
            last = Some(line);
        }
    }
    match last {
        None => Ok(None),
        Some(line) => {
            let record: LedgerRecord =
                serde_json::from_str(&line).map_err(|e| LedgerError::Malformed {
                    index: 0,
                    reason: e.to_string(),
                })?;
            Ok(Some(record.entry_hash))
        }
    }
}

fn read_all(path: &Path) -> Result<Vec<LedgerRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: LedgerRecord =
            serde_json::from_str(&line).map_err(|e| LedgerError::Malformed {
                index,
                reason: e.to_string(),
            })?;
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ledger_with_keys(dir: &Path) -> (AuditLedger, Arc<KeyPair>) {
        let keys = Arc::new(KeyPair::generate(2048).unwrap());
        let ledger = AuditLedger::open(&dir.join("audit.log"), keys.clone()).unwrap();
        (ledger, keys)
    }

    #[test]
    fn test_append_links_entries() {
        let dir = tempfile::tempdir().unwrap();
        let (ledger, keys) = ledger_with_keys(dir.path());

        let first = ledger
            .append(EntryBody::new("artifact_registered", "operator", "aa"))
            .unwrap();
        let second = ledger
            .append(EntryBody::new("artifact_activated", "operator", "bb"))
            .unwrap();

        assert_eq!(first.previous_hash, None);
        assert_eq!(second.previous_hash.as_deref(), Some(first.entry_hash.as_str()));
        assert_eq!(ledger.verify_chain(keys.public()).unwrap(), 2);
    }

    #[test]
    fn test_reopen_seeds_chain_head() {
        let dir = tempfile::tempdir().unwrap();
        let keys = Arc::new(KeyPair::generate(2048).unwrap());
        let path = dir.path().join("audit.log");

        let first = {
            let ledger = AuditLedger::open(&path, keys.clone()).unwrap();
            ledger
                .append(EntryBody::new("validation_run", "validator", "cc"))
                .unwrap()
        };

        let reopened = AuditLedger::open(&path, keys.clone()).unwrap();
        let second = reopened
            .append(EntryBody::new("validation_run", "validator", "dd"))
            .unwrap();

        assert_eq!(second.previous_hash.as_deref(), Some(first.entry_hash.as_str()));
        assert_eq!(reopened.verify_chain(keys.public()).unwrap(), 2);
    }

    #[test]
    fn test_tampered_body_breaks_chain_at_index() {
        let dir = tempfile::tempdir().unwrap();
        let (ledger, keys) = ledger_with_keys(dir.path());

        for i in 0..3 {
            ledger
                .append(
                    EntryBody::new("validation_run", "validator", "ee")
                        .with("sequence", json!(i)),
                )
                .unwrap();
        }

        // Flip one byte inside the middle record's body.
        let content = std::fs::read_to_string(ledger.path()).unwrap();
        let mut lines: Vec<String> = content.lines().map(String::from).collect();
        lines[1] = lines[1].replace("\"sequence\":1", "\"sequence\":9");
        std::fs::write(ledger.path(), lines.join("\n") + "\n").unwrap();

        let reopened = AuditLedger::open(ledger.path(), keys.clone()).unwrap();
        match reopened.verify_chain(keys.public()) {
            Err(LedgerError::ChainBroken { index, .. }) => assert_eq!(index, 1),
            other => panic!("expected ChainBroken, got {other:?}"),
        }
    }

    #[test]
    fn test_entries_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let (ledger, _) = ledger_with_keys(dir.path());

        for i in 0..5 {
            ledger
                .append(EntryBody::new("tick", "system", "ff").with("n", json!(i)))
                .unwrap();
        }

        let latest = ledger.entries(2).unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].body.details["n"], json!(4));
        assert_eq!(latest[1].body.details["n"], json!(3));
    }

    #[test]
    fn test_empty_ledger_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let (ledger, keys) = ledger_with_keys(dir.path());
        assert_eq!(ledger.verify_chain(keys.public()).unwrap(), 0);
    }

    #[test]
    fn test_wrong_key_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let (ledger, _) = ledger_with_keys(dir.path());
        ledger
            .append(EntryBody::new("validation_run", "validator", "aa"))
            .unwrap();

        let other = KeyPair::generate(2048).unwrap();
        assert!(ledger.verify_chain(other.public()).is_err());
    }
}
