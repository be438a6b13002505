//! Validation run API.

use crate::error::ApiError;
use crate::state::SharedState;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use ransomeye_validator::ScenarioKind;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

#[derive(Debug, Deserialize, Default)]
pub struct TriggerRequest {
    #[serde(default)]
    pub scenario: Option<ScenarioKind>,
    #[serde(default)]
    pub alert_count: Option<usize>,
}

/// `POST /runs` - execute a validation run to completion.
///
/// A failed scenario has already been attested (FAILED ledger entry,
/// artifacts on disk) by the time the error response leaves this handler.
pub async fn trigger(
    State(state): State<SharedState>,
    body: Option<Json<TriggerRequest>>,
) -> Result<Json<Value>, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let kind = request.scenario.unwrap_or(ScenarioKind::HappyPath);

    let run = state
        .orchestrator
        .run_validation(kind, request.alert_count)
        .await?;

    info!(run_id = %run.run_id, "validation run passed");
    Ok(Json(json!({
        "run_id": run.run_id,
        "status": run.status,
        "health_score": run.health.health_score,
        "entry_hash": run.entry_hash,
    })))
}

/// `GET /runs`
pub async fn list(State(state): State<SharedState>) -> Result<Json<Value>, ApiError> {
    let runs = state.orchestrator.attestor().store().list_runs(100)?;
    Ok(Json(json!({ "runs": runs })))
}

/// `GET /runs/{id}`
pub async fn get(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let run = state.orchestrator.attestor().store().get_run(&run_id)?;
    Ok(Json(serde_json::to_value(run).map_err(|e| ApiError::internal(e.to_string()))?))
}

/// `GET /runs/{id}/report` - the signed PDF bytes.
pub async fn report(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let path = state.orchestrator.attestor().store().pdf_path(&run_id);
    if !path.exists() {
        return Err(ApiError::not_found(format!("report for run {run_id}")));
    }
    let bytes = std::fs::read(&path).map_err(|e| ApiError::internal(e.to_string()))?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/pdf")],
        bytes,
    ))
}

/// `GET /runs/{id}/verify`
pub async fn verify(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let verification = state
        .orchestrator
        .attestor()
        .verify_run(&run_id, state.keys.public())?;
    Ok(Json(serde_json::to_value(verification).map_err(|e| ApiError::internal(e.to_string()))?))
}
