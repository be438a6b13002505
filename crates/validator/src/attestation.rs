//! Run attestation - the ordered, fail-closed tail of every validation run.
//!
//! Render PDF -> hash it -> build and sign the run manifest -> persist
//! artifacts -> append the signed ledger entry binding run id, manifest
//! hash and verdict. Any failure along the way records a FAILED ledger
//! entry and propagates the error; no partial artifact set is ever
//! reported as success.

use crate::report::render_pdf;
use crate::run_store::RunStore;
use crate::runner::{RunRecord, RunStatus};
use crate::{Result, ValidatorError};
use ransomeye_crypto::{canonical_json_bytes, hash_bytes, sign_base64, verify_base64, KeyPair};
use ransomeye_ledger::{AuditLedger, EntryBody};
use rsa::RsaPublicKey;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

const ACTOR: &str = "global-validator";
const SIGNER: &str = "ransomeye-global-validator";

/// Hashes produced by a successful attestation.
#[derive(Debug, Clone)]
pub struct AttestationOutcome {
    pub pdf_hash: String,
    pub manifest_hash: String,
    pub entry_hash: String,
}

/// Verification surface for attested runs.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RunVerification {
    pub manifest_verified: bool,
    pub chain_complete: bool,
    pub ledger_consistent: bool,
}

pub struct Attestor {
    keys: Arc<KeyPair>,
    ledger: Arc<AuditLedger>,
    store: RunStore,
}

impl Attestor {
    pub fn new(keys: Arc<KeyPair>, ledger: Arc<AuditLedger>, store: RunStore) -> Self {
        Self { keys, ledger, store }
    }

    pub fn store(&self) -> &RunStore {
        &self.store
    }

    /// Attest a completed run (passed or failed). On an internal error the
    /// ledger still receives a FAILED entry before the error propagates.
    pub fn attest(&self, run: &mut RunRecord) -> Result<AttestationOutcome> {
        match self.attest_inner(run) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(run_id = %run.run_id, error = %e, "attestation failed, recording FAILED entry");
                let body = EntryBody::new("validation_run", ACTOR, "")
                    .with("run_id", json!(run.run_id.to_string()))
                    .with("passed", json!(false))
                    .with("scenario", json!(run.scenario_name))
                    .with("error", json!(format!("{}: {e}", e.kind())));
                if let Err(ledger_err) = self.ledger.append(body) {
                    error!(error = %ledger_err, "failed to record attestation failure in ledger");
                }
                Err(e)
            }
        }
    }

    fn attest_inner(&self, run: &mut RunRecord) -> Result<AttestationOutcome> {
        let run_id = run.run_id.to_string();

        // Render the report and bind its hash into the manifest.
        let pdf = render_pdf(run);
        let pdf_hash = hash_bytes(&pdf);
        let pdf_path = self.store.pdf_path(&run_id);
        std::fs::write(&pdf_path, &pdf)?;

        let manifest = json!({
            "manifest_version": "1.0",
            "run_id": run_id,
            "scenario_id": run.scenario_id,
            "scenario_name": run.scenario_name,
            "status": run.status,
            "start_time": run.start_time,
            "end_time": run.end_time,
            "metrics": run.metrics,
            "health": run.health,
            "report": {
                "path": pdf_path.display().to_string(),
                "sha256": pdf_hash,
            },
        });
        let manifest_bytes = canonical_json_bytes(&manifest)?;
        let manifest_hash = hash_bytes(&manifest_bytes);
        let signature = sign_base64(self.keys.private(), &manifest_bytes)?;

        let signed_manifest = json!({
            "manifest": manifest,
            "manifest_hash": manifest_hash,
            "signature": {
                "signature_b64": signature,
                "signer": SIGNER,
                "signed_at": run.end_time,
            },
        });
        let manifest_path = self.store.manifest_path(&run_id);
        std::fs::write(
            &manifest_path,
            serde_json::to_vec_pretty(&signed_manifest)
                .map_err(|e| ValidatorError::Attestation(e.to_string()))?,
        )?;

        run.artifacts.pdf_path = Some(pdf_path.display().to_string());
        run.artifacts.manifest_path = Some(manifest_path.display().to_string());

        // The ledger entry is what downstream consumers trust; the run
        // document is persisted carrying its chain hash.
        let passed = run.status == RunStatus::Passed;
        let body = EntryBody::new("validation_run", ACTOR, &manifest_hash)
            .with("run_id", json!(run_id))
            .with("passed", json!(passed))
            .with("scenario", json!(run.scenario_name))
            .with("health_score", json!(run.health.health_score));
        let record = self.ledger.append(body)?;
        run.entry_hash = Some(record.entry_hash.clone());

        self.store.store_run(run)?;

        info!(
            run_id = %run_id,
            passed,
            manifest_hash = %manifest_hash,
            entry_hash = %record.entry_hash,
            "run attested"
        );
        Ok(AttestationOutcome {
            pdf_hash,
            manifest_hash,
            entry_hash: record.entry_hash,
        })
    }

    /// Re-verify a stored run: manifest signature over the canonical
    /// manifest bytes, the chain booleans recorded by the run, and full
    /// ledger chain consistency.
    pub fn verify_run(&self, run_id: &str, public_key: &RsaPublicKey) -> Result<RunVerification> {
        let manifest_path = self.store.manifest_path(run_id);
        let manifest_verified = if manifest_path.exists() {
            let bytes = std::fs::read(&manifest_path)?;
            let signed: serde_json::Value = serde_json::from_slice(&bytes)
                .map_err(|e| ValidatorError::Attestation(e.to_string()))?;
            match (
                signed.get("manifest"),
                signed
                    .get("signature")
                    .and_then(|s| s.get("signature_b64"))
                    .and_then(|s| s.as_str()),
            ) {
                (Some(manifest), Some(signature)) => {
                    let manifest_bytes = canonical_json_bytes(manifest)?;
                    verify_base64(public_key, &manifest_bytes, signature).is_ok()
                }
                _ => false,
            }
        } else {
            false
        };

        let run = self.store.get_run(run_id)?;
        let chain_complete = run
            .steps
            .iter()
            .find(|s| s.name == "verify_chain")
            .and_then(|s| s.details.get("chain_complete"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let ledger_consistent = self.ledger.verify_chain(public_key).is_ok();

        Ok(RunVerification {
            manifest_verified,
            chain_complete,
            ledger_consistent,
        })
    }
}
