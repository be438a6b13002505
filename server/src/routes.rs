//! Router assembly.

use crate::handlers::{artifacts, ingest, intel, runs, stats};
use crate::state::SharedState;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

/// Upload bodies carry whole bundles; the extraction-side limits in the
/// verifier are the real bound.
const MAX_BODY_BYTES: usize = 1024 * 1024 * 1024;

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/ingest", post(ingest::ingest))
        .route("/intel/ingest", post(intel::ingest))
        .route("/artifacts/upload", post(artifacts::upload))
        .route("/artifacts", get(artifacts::list))
        .route("/artifacts/active", get(artifacts::active))
        .route(
            "/artifacts/:id",
            get(artifacts::get_by_id).delete(artifacts::delete),
        )
        .route("/artifacts/:id/activate", post(artifacts::activate))
        .route("/runs", post(runs::trigger).get(runs::list))
        .route("/runs/:id", get(runs::get))
        .route("/runs/:id/report", get(runs::report))
        .route("/runs/:id/verify", get(runs::verify))
        .route("/stats", get(stats::stats))
        .route("/healthz", get(stats::healthz))
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}
