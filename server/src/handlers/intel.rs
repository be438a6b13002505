//! Threat-intel ingest: heterogeneous feed payloads are normalised into
//! canonical IOC records at this boundary and handed to the best-effort
//! persistence path.

use crate::error::ApiError;
use crate::state::SharedState;
use axum::extract::State;
use axum::Json;
use ransomeye_alert_core::normalize_feed;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

#[derive(Deserialize)]
pub struct IntelSubmission {
    /// Feed tag recorded as the record source.
    pub source: String,
    /// Raw feed payload: array, `{data: [...]}` wrapper, or single item.
    pub items: Value,
}

/// `POST /intel/ingest`
pub async fn ingest(
    State(state): State<SharedState>,
    Json(submission): Json<IntelSubmission>,
) -> Result<Json<Value>, ApiError> {
    let records = normalize_feed(&submission.items, &submission.source);
    for record in &records {
        let value = serde_json::to_value(record)
            .map_err(|e| ApiError::internal(e.to_string()))?;
        state.buffer.offer(json!({"record_type": "ioc", "ioc": value}));
    }

    info!(source = %submission.source, accepted = records.len(), "intel feed normalised");
    Ok(Json(json!({
        "source": submission.source,
        "accepted": records.len(),
        "records": records,
    })))
}
