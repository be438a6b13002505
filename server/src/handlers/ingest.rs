//! Alert ingest: normalise -> evaluate snapshot -> dedup -> persist.

use crate::error::ApiError;
use crate::state::SharedState;
use axum::extract::State;
use axum::Json;
use ransomeye_alert_core::{evaluate, Alert, AlertSubmission, DedupVerdict};
use serde_json::{json, Value};
use tracing::debug;

/// `POST /ingest`
///
/// The ruleset snapshot is taken once at entry; a concurrent policy swap
/// never affects an in-flight evaluation. Duplicates short-circuit before
/// persistence.
pub async fn ingest(
    State(state): State<SharedState>,
    Json(submission): Json<AlertSubmission>,
) -> Result<Json<Value>, ApiError> {
    let alert = Alert::accept(submission);

    let matches = match state.rulesets.current() {
        Some(ruleset) => evaluate(&ruleset, &alert),
        None => Vec::new(),
    };

    match state.dedup.check(&alert).await {
        DedupVerdict::Duplicate(kind) => {
            debug!(alert_id = %alert.alert_id, ?kind, "duplicate alert suppressed");
            Ok(Json(json!({
                "alert_id": alert.alert_id,
                "status": "duplicate",
                "is_duplicate": true,
                "duplicate_kind": kind,
                "matches": matches,
            })))
        }
        DedupVerdict::Unique => {
            state.insert_alert_row(&alert)?;

            let mut record = serde_json::to_value(&alert)
                .map_err(|e| ApiError::internal(e.to_string()))?;
            record["matches"] = serde_json::to_value(&matches)
                .map_err(|e| ApiError::internal(e.to_string()))?;
            state.buffer.offer(record);

            Ok(Json(json!({
                "alert_id": alert.alert_id,
                "status": "processed",
                "is_duplicate": false,
                "matches": matches,
            })))
        }
    }
}
