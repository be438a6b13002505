//! Lightweight in-memory stats surface; no external metrics stack.

use crate::error::ApiError;
use crate::state::SharedState;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

/// `GET /stats`
pub async fn stats(State(state): State<SharedState>) -> Result<Json<Value>, ApiError> {
    let ruleset = state.rulesets.current();
    Ok(Json(json!({
        "dedup": state.dedup.stats().await,
        "buffer": state.buffer.stats(),
        "ruleset": {
            "loaded": ruleset.is_some(),
            "rules": ruleset.as_ref().map(|r| r.len()).unwrap_or(0),
            "dropped": ruleset.as_ref().map(|r| r.dropped).unwrap_or(0),
        },
        "scorer_model_loaded": state.models.is_loaded(),
    })))
}

/// `GET /healthz`
pub async fn healthz() -> Json<Value> {
    Json(json!({"status": "ok"}))
}
