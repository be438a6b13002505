//! Persistence of run artifacts under `<storage_root>/runs/`.

use crate::runner::{RunRecord, RunStatus};
use crate::{Result, ValidatorError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Stable path scheme: `<run_id>_run.json`, `<run_id>_report.pdf`,
/// `<run_id>_manifest.signed.json`.
#[derive(Debug, Clone)]
pub struct RunStore {
    dir: PathBuf,
}

/// Row in the run listing.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub scenario_name: String,
    pub status: RunStatus,
    pub start_time: String,
}

impl RunStore {
    pub fn new(storage_root: &Path) -> Result<Self> {
        let dir = storage_root.join("runs");
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn run_path(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}_run.json"))
    }

    pub fn pdf_path(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}_report.pdf"))
    }

    pub fn manifest_path(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}_manifest.signed.json"))
    }

    pub fn store_run(&self, run: &RunRecord) -> Result<()> {
        let path = self.run_path(&run.run_id.to_string());
        let json = serde_json::to_vec_pretty(run)
            .map_err(|e| ValidatorError::Attestation(e.to_string()))?;
        std::fs::write(&path, json)?;
        info!(run_id = %run.run_id, path = %path.display(), "run document stored");
        Ok(())
    }

    pub fn get_run(&self, run_id: &str) -> Result<RunRecord> {
        let path = self.run_path(run_id);
        if !path.exists() {
            return Err(ValidatorError::RunNotFound(run_id.to_string()));
        }
        let bytes = std::fs::read(&path)?;
        serde_json::from_slice(&bytes).map_err(|e| ValidatorError::Attestation(e.to_string()))
    }

    /// Stored runs, newest first.
    pub fn list_runs(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let mut summaries = Vec::new();
        for dent in std::fs::read_dir(&self.dir)? {
            let path = dent?.path();
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
            if !name.map(|n| n.ends_with("_run.json")).unwrap_or(false) {
                continue;
            }
            match std::fs::read(&path)
                .ok()
                .and_then(|b| serde_json::from_slice::<RunRecord>(&b).ok())
            {
                Some(run) => summaries.push(RunSummary {
                    run_id: run.run_id.to_string(),
                    scenario_name: run.scenario_name,
                    status: run.status,
                    start_time: run.start_time,
                }),
                None => warn!(path = %path.display(), "skipping unreadable run file"),
            }
        }
        summaries.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        summaries.truncate(limit);
        Ok(summaries)
    }
}
