// RansomEye platform command interface

use clap::{Parser, Subcommand};
use ransomeye_server::{build_router, AppState, Config};
use ransomeye_validator::ScenarioKind;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const EXIT_GENERIC: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_CRYPTO: u8 = 3;
const EXIT_VALIDATION_FAILED: u8 = 4;

#[derive(Parser)]
#[command(name = "ransomeye-server", about = "RansomEye ransomware-defense platform")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server.
    Serve,
    /// Execute one validation run against the configured ingest endpoint.
    Validate {
        /// Scenario to run: happy_path or stress_test.
        #[arg(long, default_value = "happy_path")]
        scenario: String,
        /// Alert burst size for stress_test.
        #[arg(long)]
        alert_count: Option<usize>,
    },
    /// Re-verify the audit ledger chain and signatures.
    VerifyLedger,
    /// Generate (or confirm) the signing key pair.
    GenKeys,
    /// Build and sign a bundle from a source directory.
    SignBundle {
        #[arg(long)]
        src: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        name: String,
        #[arg(long)]
        version: String,
        /// Artifact kind: policy or model.
        #[arg(long)]
        kind: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration error");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let result = match cli.command {
        Command::Serve => serve(config).await,
        Command::Validate {
            scenario,
            alert_count,
        } => validate(config, &scenario, alert_count).await,
        Command::VerifyLedger => verify_ledger(config).await,
        Command::GenKeys => gen_keys(config),
        Command::SignBundle {
            src,
            out,
            name,
            version,
            kind,
        } => sign_bundle(config, src, out, name, version, kind),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

async fn serve(config: Config) -> Result<(), u8> {
    let listen_addr = config.server.listen_addr.clone();
    let state = AppState::initialize(config).await.map_err(|e| {
        error!(error = %e, "failed to initialize server state");
        EXIT_GENERIC
    })?;

    let maintenance = ransomeye_server::maintenance::spawn_maintenance(state.clone());
    let router = build_router(state.clone());

    let listener = tokio::net::TcpListener::bind(&listen_addr).await.map_err(|e| {
        error!(error = %e, addr = %listen_addr, "cannot bind listener");
        EXIT_CONFIG
    })?;
    info!(addr = %listen_addr, "ransomeye server listening");

    let shutdown_state = state.clone();
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await;

    shutdown_state.shutdown().await;
    let _ = maintenance.await;

    served.map_err(|e| {
        error!(error = %e, "server error");
        EXIT_GENERIC
    })
}

async fn validate(config: Config, scenario: &str, alert_count: Option<usize>) -> Result<(), u8> {
    let kind = match scenario {
        "happy_path" => ScenarioKind::HappyPath,
        "stress_test" => ScenarioKind::StressTest,
        other => {
            error!(scenario = other, "unknown scenario");
            return Err(EXIT_CONFIG);
        }
    };

    let state = AppState::initialize(config).await.map_err(|e| {
        error!(error = %e, "failed to initialize validator state");
        EXIT_GENERIC
    })?;

    match state.orchestrator.run_validation(kind, alert_count).await {
        Ok(run) => {
            info!(run_id = %run.run_id, health_score = run.health.health_score, "validation PASSED");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, kind = e.kind(), "validation FAILED");
            match e.kind() {
                "scenario_failed" | "timed_out" => Err(EXIT_VALIDATION_FAILED),
                "key_missing" | "key_malformed" | "signature_invalid" | "hash_mismatch" => {
                    Err(EXIT_CRYPTO)
                }
                _ => Err(EXIT_GENERIC),
            }
        }
    }
}

async fn verify_ledger(config: Config) -> Result<(), u8> {
    let keys = ransomeye_crypto::KeyPair::load(&config.private_key_path()).map_err(|e| {
        error!(error = %e, "cannot load signing keys");
        EXIT_CRYPTO
    })?;
    let ledger = ransomeye_ledger::AuditLedger::open(
        &config.audit_log_path(),
        std::sync::Arc::new(keys.clone()),
    )
    .map_err(|e| {
        error!(error = %e, "cannot open ledger");
        EXIT_GENERIC
    })?;

    match ledger.verify_chain(keys.public()) {
        Ok(count) => {
            info!(entries = count, "ledger chain verified");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "ledger chain BROKEN");
            Err(EXIT_CRYPTO)
        }
    }
}

fn gen_keys(config: Config) -> Result<(), u8> {
    ransomeye_crypto::KeyPair::load_or_generate(
        &config.private_key_path(),
        &config.public_key_path(),
    )
    .map(|_| {
        info!(
            private = %config.private_key_path().display(),
            public = %config.public_key_path().display(),
            "signing keys ready"
        );
    })
    .map_err(|e| {
        error!(error = %e, "key generation failed");
        EXIT_CRYPTO
    })
}

fn sign_bundle(
    config: Config,
    src: PathBuf,
    out: PathBuf,
    name: String,
    version: String,
    kind: String,
) -> Result<(), u8> {
    let keys = ransomeye_crypto::KeyPair::load_or_generate(
        &config.private_key_path(),
        &config.public_key_path(),
    )
    .map_err(|e| {
        error!(error = %e, "cannot load signing keys");
        EXIT_CRYPTO
    })?;

    let mut extra = std::collections::BTreeMap::new();
    extra.insert("kind".to_string(), serde_json::Value::String(kind));
    let metadata = ransomeye_bundle::ManifestMetadata {
        name,
        version,
        extra,
    };

    ransomeye_bundle::BundleBuilder::new(metadata)
        .build(&src, keys.private(), &out)
        .map(|manifest_hash| {
            info!(bundle = %out.display(), manifest_hash = %manifest_hash, "bundle signed");
        })
        .map_err(|e| {
            error!(error = %e, "bundle build failed");
            EXIT_GENERIC
        })
}
