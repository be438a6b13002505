//! Artifact lifecycle: upload -> verify -> materialise -> register ->
//! activate -> hot-swap.

use crate::error::ApiError;
use crate::state::SharedState;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use ransomeye_ledger::EntryBody;
use ransomeye_registry::{ArtifactStatus, NewArtifact};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

fn uploader_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-uploader")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// `POST /artifacts/upload` - raw gzip-tar bundle body.
///
/// The whole verify-materialise-register pipeline runs off the request
/// worker and is bounded by `max_verify_secs`.
pub async fn upload(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let uploader = uploader_from(&headers);
    let uploads_dir = state.config.uploads_dir();
    std::fs::create_dir_all(&uploads_dir).map_err(|e| ApiError::internal(e.to_string()))?;
    let bundle_path = uploads_dir.join(format!(".upload-{}.tar.gz", Uuid::new_v4()));
    std::fs::write(&bundle_path, &body).map_err(|e| ApiError::internal(e.to_string()))?;

    let pipeline_state = state.clone();
    let pipeline_bundle = bundle_path.clone();
    let pipeline = tokio::task::spawn_blocking(move || -> Result<Value, ApiError> {
        let state = pipeline_state;
        let verified = state
            .verifier
            .verify(&pipeline_bundle, &state.config.uploads_dir())?;
        let manifest_hash = verified.manifest_hash.clone();

        let registered = state.registry.register(NewArtifact {
            name: verified.manifest.name().to_string(),
            version: verified.manifest.version().to_string(),
            manifest_hash: manifest_hash.clone(),
            file_path: state
                .store
                .artifact_dir(&manifest_hash)
                .display()
                .to_string(),
            metadata: serde_json::to_value(&verified.manifest.metadata)
                .map_err(|e| ApiError::internal(e.to_string()))?,
            uploaded_by: uploader.clone(),
        })?;

        if registered.created {
            state.store.materialize(&manifest_hash, &verified)?;
            let body = EntryBody::new(
                "artifact_registered",
                uploader.as_deref().unwrap_or("anonymous"),
                &manifest_hash,
            )
            .with("artifact_id", json!(registered.artifact_id))
            .with("name", json!(verified.manifest.name()))
            .with("version", json!(verified.manifest.version()));
            state
                .ledger
                .append(body)
                .map_err(|e| ApiError::internal(e.to_string()))?;
        }

        Ok(json!({
            "artifact_id": registered.artifact_id,
            "status": "accepted",
            "created": registered.created,
            "name": verified.manifest.name(),
            "version": verified.manifest.version(),
            "manifest_hash": manifest_hash,
        }))
    });

    let verify_budget = Duration::from_secs(state.config.bundles.max_verify_secs);
    let outcome = tokio::time::timeout(verify_budget, pipeline).await;
    let _ = std::fs::remove_file(&bundle_path);

    match outcome {
        Err(_elapsed) => Err(ApiError::new(
            StatusCode::GATEWAY_TIMEOUT,
            "timed_out",
            format!("bundle verification exceeded {}s", verify_budget.as_secs()),
        )),
        Ok(Err(join_err)) => Err(ApiError::internal(join_err.to_string())),
        Ok(Ok(result)) => {
            if let Ok(response) = &result {
                info!(artifact_id = %response["artifact_id"], "bundle accepted");
            }
            result.map(Json)
        }
    }
}

/// `POST /artifacts/{id}/activate` - idempotent promotion.
pub async fn activate(
    State(state): State<SharedState>,
    Path(artifact_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let actor = uploader_from(&headers).unwrap_or_else(|| "operator".to_string());
    let state_clone = state.clone();
    let record = tokio::task::spawn_blocking(move || {
        state_clone.activate_artifact(&artifact_id, &actor)
    })
    .await
    .map_err(|e| ApiError::internal(e.to_string()))??;

    Ok(Json(json!({
        "artifact_id": record.artifact_id,
        "status": record.status,
        "name": record.name,
        "version": record.version,
        "activated_at": record.activated_at,
    })))
}

/// `GET /artifacts/active` - metadata only, never bytes.
pub async fn active(State(state): State<SharedState>) -> Result<Json<Value>, ApiError> {
    let records = state.registry.list(Some(ArtifactStatus::Active))?;
    Ok(Json(json!({
        "artifacts": records,
        "loaded": {
            "policy": state.rulesets.info(),
            "model": state.models.info(),
        },
    })))
}

#[derive(Deserialize)]
pub struct ListQuery {
    status: Option<ArtifactStatus>,
}

/// `GET /artifacts`
pub async fn list(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let records = state.registry.list(query.status)?;
    Ok(Json(json!({ "artifacts": records })))
}

/// `GET /artifacts/{id}`
pub async fn get_by_id(
    State(state): State<SharedState>,
    Path(artifact_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let record = state
        .registry
        .get_by_id(&artifact_id)?
        .ok_or_else(|| ApiError::not_found(format!("artifact {artifact_id}")))?;
    Ok(Json(serde_json::to_value(record).map_err(|e| ApiError::internal(e.to_string()))?))
}

/// `DELETE /artifacts/{id}` - refused while active.
pub async fn delete(
    State(state): State<SharedState>,
    Path(artifact_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let record = state.registry.delete(&artifact_id)?;
    state.store.delete_artifact(&record.manifest_hash)?;

    let actor = uploader_from(&headers).unwrap_or_else(|| "operator".to_string());
    let body = EntryBody::new("artifact_deleted", &actor, &record.manifest_hash)
        .with("artifact_id", json!(record.artifact_id))
        .with("name", json!(record.name));
    state
        .ledger
        .append(body)
        .map_err(|e| ApiError::internal(e.to_string()))?;

    Ok(Json(json!({
        "artifact_id": record.artifact_id,
        "status": "deleted",
    })))
}
