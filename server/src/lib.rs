// RansomEye Server - ingress glue over the platform cores
// Routes, configuration and process wiring; core logic lives in the crates

//! # RansomEye Server
//!
//! Fans HTTP requests into the cores: alert ingest (evaluate, dedup,
//! buffer), signed-bundle lifecycle (verify, materialise, register,
//! activate, hot-swap) and validation runs (scenario, chain, attestation).

pub mod config;
pub mod error;
pub mod handlers;
pub mod maintenance;
pub mod routes;
pub mod state;

pub use config::Config;
pub use routes::build_router;
pub use state::{AppState, SharedState};
