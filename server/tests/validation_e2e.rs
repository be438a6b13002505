//! End-to-end tests over the live HTTP surface: ingest dedup, the policy
//! lifecycle and full validation runs with simulated downstream
//! collaborators (kill-chain and forensics) writing the incident and
//! evidence tables.

use ransomeye_bundle::{BundleBuilder, ManifestMetadata};
use ransomeye_crypto::KeyPair;
use ransomeye_server::{build_router, AppState, Config, SharedState};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

struct TestServer {
    addr: SocketAddr,
    state: SharedState,
    keys: KeyPair,
    dir: TempDir,
    client: reqwest::Client,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    fn records_db(&self) -> PathBuf {
        self.state.config.registry_db_path()
    }
}

async fn spawn_server(configure: impl FnOnce(&mut Config)) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.storage.root = dir.path().join("state");
    config.ingest.buffer_flush_secs = 1;

    // Pre-provision a small key pair so start-up stays fast in tests.
    let keys = KeyPair::generate(2048).unwrap();
    keys.persist(&config.private_key_path(), &config.public_key_path())
        .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    config.server.listen_addr = addr.to_string();
    config.validator.ingest_url = Some(format!("http://{addr}/ingest"));
    configure(&mut config);

    let state = AppState::initialize(config).await.unwrap();
    let router = build_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestServer {
        addr,
        state,
        keys,
        dir,
        client: reqwest::Client::new(),
    }
}

/// Simulated kill-chain and forensic services: derive an incident from
/// every new alert, then evidence from every incident one tick later.
fn spawn_collaborators(db: PathBuf) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(150)).await;
            let conn = match Connection::open(&db) {
                Ok(conn) => conn,
                Err(_) => continue,
            };

            // Evidence pass first so it trails incidents by one tick.
            let incidents: Vec<String> = conn
                .prepare(
                    "SELECT i.incident_id FROM incidents i
                     LEFT JOIN evidence e ON e.incident_id = i.incident_id
                     WHERE e.evidence_id IS NULL",
                )
                .unwrap()
                .query_map([], |row| row.get(0))
                .unwrap()
                .filter_map(|r| r.ok())
                .collect();
            for incident_id in incidents {
                conn.execute(
                    "INSERT INTO evidence VALUES (?1, ?2, 'file', ?3, 'validation-host', ?4)",
                    rusqlite::params![
                        Uuid::new_v4().to_string(),
                        incident_id,
                        "deadbeef",
                        "2026-08-01T00:00:00.000Z",
                    ],
                )
                .unwrap();
            }

            let alerts: Vec<String> = conn
                .prepare(
                    "SELECT a.alert_id FROM alerts a
                     LEFT JOIN incidents i ON i.alert_id = a.alert_id
                     WHERE i.incident_id IS NULL",
                )
                .unwrap()
                .query_map([], |row| row.get(0))
                .unwrap()
                .filter_map(|r| r.ok())
                .collect();
            for alert_id in alerts {
                conn.execute(
                    "INSERT INTO incidents VALUES (?1, ?2, ?3)",
                    rusqlite::params![
                        Uuid::new_v4().to_string(),
                        alert_id,
                        "2026-08-01T00:00:00.000Z",
                    ],
                )
                .unwrap();
            }
        }
    })
}

fn policy_bundle(dir: &Path, keys: &KeyPair, version: &str, pattern: &str) -> Vec<u8> {
    let src = dir.join(format!("policy-src-{version}"));
    std::fs::create_dir_all(&src).unwrap();
    let rules = json!({
        "rules": [{
            "rule_id": "ransom-note",
            "name": "ransom note text",
            "severity": "critical",
            "action": "isolate_host",
            "condition": {"type": "substring", "field": "note", "value": pattern}
        }]
    });
    std::fs::write(src.join("rules.json"), rules.to_string()).unwrap();

    let out = dir.join(format!("policy-{version}.tar.gz"));
    let mut extra = BTreeMap::new();
    extra.insert("kind".to_string(), json!("policy"));
    BundleBuilder::new(ManifestMetadata {
        name: "alert-policy".to_string(),
        version: version.to_string(),
        extra,
    })
    .build(&src, keys.private(), &out)
    .unwrap();
    std::fs::read(&out).unwrap()
}

async fn upload_and_activate(server: &TestServer, bundle: Vec<u8>) -> String {
    let response: Value = server
        .client
        .post(server.url("/artifacts/upload"))
        .header("x-uploader", "e2e-test")
        .body(bundle)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(response["status"], "accepted", "upload response {response}");
    let artifact_id = response["artifact_id"].as_str().unwrap().to_string();

    let activated = server
        .client
        .post(server.url(&format!("/artifacts/{artifact_id}/activate")))
        .send()
        .await
        .unwrap();
    assert!(activated.status().is_success());
    artifact_id
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_exact_duplicate_over_http() {
    let server = spawn_server(|_| {}).await;

    let payload = json!({"source": "s", "alert_type": "t", "target": "x"});
    let first: Value = server
        .client
        .post(server.url("/ingest"))
        .json(&payload)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first["status"], "processed");
    assert_eq!(first["is_duplicate"], json!(false));

    let second: Value = server
        .client
        .post(server.url("/ingest"))
        .json(&payload)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(second["status"], "duplicate");
    assert_eq!(second["is_duplicate"], json!(true));
    assert_eq!(second["duplicate_kind"], "exact");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fuzzy_duplicate_over_http() {
    let server = spawn_server(|_| {}).await;

    let note_a = "ransomware detected mass file encryption on share finance \
                  with entropy spike and shadow copy deletion";
    let note_b = "ransomware detected mass file encryption on share finance \
                  with entropy spike and shadow copy removal";

    // Different exact tuples (target case differs), near-identical text.
    let first = json!({
        "source": "edr", "alert_type": "encryption", "target": "fin-srv",
        "metadata": {"note": note_a}
    });
    let second = json!({
        "source": "edr", "alert_type": "encryption", "target": "FIN-SRV",
        "metadata": {"note": note_b}
    });

    let a: Value = server
        .client
        .post(server.url("/ingest"))
        .json(&first)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(a["status"], "processed");

    let b: Value = server
        .client
        .post(server.url("/ingest"))
        .json(&second)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(b["status"], "duplicate", "response {b}");
    assert_eq!(b["duplicate_kind"], "fuzzy");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_policy_lifecycle_and_single_active() {
    let server = spawn_server(|_| {}).await;

    // Upload and activate policy A; matching alerts now hit its rule.
    let bundle_a = policy_bundle(server.dir.path(), &server.keys, "1.0.0", "encrypted by lockbit");
    let artifact_a = upload_and_activate(&server, bundle_a).await;

    let alert = json!({
        "source": "edr", "alert_type": "note_drop", "target": "host-1",
        "metadata": {"note": "your files were ENCRYPTED BY LockBit"}
    });
    let response: Value = server
        .client
        .post(server.url("/ingest"))
        .json(&alert)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let matches = response["matches"].as_array().unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0]["rule_id"], "ransom-note");
    assert_eq!(matches[0]["severity"], "critical");

    // Upload policy B under the same name and activate it; A demotes.
    let bundle_b = policy_bundle(server.dir.path(), &server.keys, "2.0.0", "different pattern");
    let artifact_b = upload_and_activate(&server, bundle_b).await;
    assert_ne!(artifact_a, artifact_b);

    let active: Value = server
        .client
        .get(server.url("/artifacts/active"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let actives = active["artifacts"].as_array().unwrap();
    assert_eq!(actives.len(), 1);
    assert_eq!(actives[0]["artifact_id"], json!(artifact_b));
    assert_eq!(active["loaded"]["policy"]["artifact_id"], json!(artifact_b));

    let record_a: Value = server
        .client
        .get(server.url(&format!("/artifacts/{artifact_a}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(record_a["status"], "inactive");

    // Re-uploading the identical bundle resolves to the existing artifact.
    let bundle_b_again =
        policy_bundle(server.dir.path(), &server.keys, "2.0.0", "different pattern");
    let again: Value = server
        .client
        .post(server.url("/artifacts/upload"))
        .body(bundle_b_again)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(again["artifact_id"], json!(artifact_b));
    assert_eq!(again["created"], json!(false));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_upload_signed_by_wrong_key_rejected() {
    let server = spawn_server(|_| {}).await;

    let rogue = KeyPair::generate(2048).unwrap();
    let bundle = policy_bundle(server.dir.path(), &rogue, "9.9.9", "whatever");

    let response = server
        .client
        .post(server.url("/artifacts/upload"))
        .body(bundle)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["kind"], "signature_invalid");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_happy_path_validation_run() {
    let server = spawn_server(|config| {
        config.validator.incident_wait_secs = 20;
        config.validator.evidence_wait_secs = 20;
    })
    .await;
    let collaborators = spawn_collaborators(server.records_db());

    let response = server
        .client
        .post(server.url("/runs"))
        .json(&json!({"scenario": "happy_path"}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success(), "run failed: {response:?}");
    let triggered: Value = response.json().await.unwrap();
    assert_eq!(triggered["status"], "PASSED");
    let run_id = triggered["run_id"].as_str().unwrap().to_string();
    assert!(triggered["entry_hash"].is_string());

    // The stored run document proves the full chain.
    let run: Value = server
        .client
        .get(server.url(&format!("/runs/{run_id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(run["status"], "PASSED");
    let verify_step = run["steps"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["name"] == "verify_chain")
        .unwrap();
    assert_eq!(verify_step["details"]["chain_complete"], json!(true));

    // Signed PDF report exists and is a PDF.
    let report = server
        .client
        .get(server.url(&format!("/runs/{run_id}/report")))
        .send()
        .await
        .unwrap();
    assert_eq!(report.headers()["content-type"], "application/pdf");
    let pdf = report.bytes().await.unwrap();
    assert!(pdf.starts_with(b"%PDF-"));

    // Manifest signature and ledger chain verify.
    let verification: Value = server
        .client
        .get(server.url(&format!("/runs/{run_id}/verify")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(verification["manifest_verified"], json!(true));
    assert_eq!(verification["chain_complete"], json!(true));
    assert_eq!(verification["ledger_consistent"], json!(true));

    // The ledger entry records the pass verdict.
    let entries = server.state.ledger.entries(1).unwrap();
    assert_eq!(entries[0].body.event_type, "validation_run");
    assert_eq!(entries[0].body.details["passed"], json!(true));
    assert_eq!(entries[0].body.details["run_id"], json!(run_id));

    collaborators.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_validation_run_is_fail_closed() {
    // No collaborators: the incident never appears and the run must fail.
    let server = spawn_server(|config| {
        config.validator.incident_wait_secs = 2;
        config.validator.evidence_wait_secs = 2;
    })
    .await;

    let response = server
        .client
        .post(server.url("/runs"))
        .json(&json!({"scenario": "happy_path"}))
        .send()
        .await
        .unwrap();
    assert_eq!(
        response.status(),
        reqwest::StatusCode::INTERNAL_SERVER_ERROR
    );
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["kind"], "scenario_failed");

    // The failed run was still fully attested: FAILED document, FAILED
    // ledger entry, artifacts on disk.
    let runs: Value = server
        .client
        .get(server.url("/runs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let listed = runs["runs"].as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["status"], "FAILED");
    let run_id = listed[0]["run_id"].as_str().unwrap();

    let entries = server.state.ledger.entries(1).unwrap();
    assert_eq!(entries[0].body.details["passed"], json!(false));

    let verification: Value = server
        .client
        .get(server.url(&format!("/runs/{run_id}/verify")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    // Artifacts are genuine (signed manifest, consistent ledger) even
    // though the run itself failed.
    assert_eq!(verification["manifest_verified"], json!(true));
    assert_eq!(verification["chain_complete"], json!(false));
    assert_eq!(verification["ledger_consistent"], json!(true));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stress_scenario_passes_against_live_ingest() {
    let server = spawn_server(|_| {}).await;

    let response = server
        .client
        .post(server.url("/runs"))
        .json(&json!({"scenario": "stress_test", "alert_count": 5}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let triggered: Value = response.json().await.unwrap();
    assert_eq!(triggered["status"], "PASSED");

    let stats: Value = server
        .client
        .get(server.url("/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(stats["dedup"]["unique"].as_u64().unwrap() >= 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_model_bundle_drives_health_scoring() {
    let server = spawn_server(|_| {}).await;

    // Before any model is active the scorer reports the bootstrap verdict.
    let stats: Value = server
        .client
        .get(server.url("/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["scorer_model_loaded"], json!(false));

    let src = server.dir.path().join("model-src");
    std::fs::create_dir_all(&src).unwrap();
    let model = json!({
        "weights": [-0.5, -0.3, -2.0, -0.1, 0.0, 3.0],
        "bias": 1.5,
        "means": [100.0, 200.0, 0.0, 0.0, 4.0, 1.0],
        "scales": [100.0, 200.0, 1.0, 10.0, 4.0, 0.25]
    });
    std::fs::write(src.join("model.json"), model.to_string()).unwrap();
    let out = server.dir.path().join("model.tar.gz");
    let mut extra = BTreeMap::new();
    extra.insert("kind".to_string(), json!("model"));
    BundleBuilder::new(ManifestMetadata {
        name: "validator-scorer".to_string(),
        version: "1.0.0".to_string(),
        extra,
    })
    .build(&src, server.keys.private(), &out)
    .unwrap();

    upload_and_activate(&server, std::fs::read(&out).unwrap()).await;

    let stats: Value = server
        .client
        .get(server.url("/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["scorer_model_loaded"], json!(true));
    assert_eq!(
        server.state.models.info().unwrap().name,
        "validator-scorer"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_intel_feed_normalisation() {
    let server = spawn_server(|_| {}).await;

    let payload = json!({
        "source": "malwarebazaar",
        "items": {"data": [
            {"value": "8.8.8.8", "confidence": 80, "tags": ["c2"]},
            {"indicator": "evil.example", "comment": "campaign infra"},
            {"note": "no indicator here"}
        ]}
    });
    let response: Value = server
        .client
        .post(server.url("/intel/ingest"))
        .json(&payload)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(response["accepted"], json!(2));
    let records = response["records"].as_array().unwrap();
    assert_eq!(records[0]["type"], "ipv4");
    assert_eq!(records[0]["source"], "malwarebazaar");
    assert_eq!(records[1]["type"], "domain");
    assert_eq!(records[1]["description"], "campaign infra");
}
