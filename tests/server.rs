//! HTTP contract tests: the router is served on an ephemeral port and
//! exercised with a real client.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;

use quest_rag::llm::LanguageModel;
use quest_rag::pipeline;
use quest_rag::progress::NoProgress;
use quest_rag::server;
use serde_json::{json, Value};
use tempfile::TempDir;

use common::{test_config, write_quest_csv, FailingLlm, RecordingLlm, TrigramEmbedder};

async fn spawn_server(tmp: &TempDir, llm: Arc<dyn LanguageModel>) -> SocketAddr {
    let cfg = test_config(tmp.path());
    write_quest_csv(&cfg.corpus.data_dir);
    let orchestrator = pipeline::init_engine_with(
        &cfg,
        Arc::new(TrigramEmbedder::default()),
        llm,
        &NoProgress,
    )
    .await
    .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::serve_on(listener, Arc::new(orchestrator)));
    addr
}

#[tokio::test]
async fn health_reports_version() {
    let tmp = TempDir::new().unwrap();
    let addr = spawn_server(&tmp, Arc::new(RecordingLlm::default())).await;

    let body: Value = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn query_returns_answer_timings_and_sources() {
    let tmp = TempDir::new().unwrap();
    let addr = spawn_server(&tmp, Arc::new(RecordingLlm::default())).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{}/query", addr))
        .json(&json!({ "prompt": "healing quest" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();

    assert_eq!(body["answer"], "Quest #1: escort the caravan");
    assert_eq!(body["session_id"], "default");
    assert_eq!(body["history_depth"], 1);
    assert!(body["execution_time_sec"].as_f64().unwrap() >= 0.0);
    assert!(body["time_retrieval_sec"].as_f64().unwrap() >= 0.0);
    assert!(body["time_llm_sec"].as_f64().unwrap() >= 0.0);

    let sources = body["sources"].as_array().unwrap();
    assert_eq!(sources.len(), 2);
    for source in sources {
        assert!(source["source"].as_str().unwrap().ends_with("quests.csv"));
        assert!(source["row"].is_u64());
    }
}

#[tokio::test]
async fn sessions_are_isolated_and_reset_clears_one() {
    let tmp = TempDir::new().unwrap();
    let addr = spawn_server(&tmp, Arc::new(RecordingLlm::default())).await;
    let client = reqwest::Client::new();
    let query = |prompt: &str, session: &str| {
        client
            .post(format!("http://{}/query", addr))
            .json(&json!({ "prompt": prompt, "session_id": session }))
            .send()
    };

    query("healing quest", "alice").await.unwrap();
    query("sword quest", "alice").await.unwrap();
    let bob: Value = query("healing quest", "bob")
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(bob["history_depth"], 1);

    let reset: Value = client
        .post(format!("http://{}/reset", addr))
        .json(&json!({ "session_id": "alice" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reset["status"], "success");
    assert_eq!(reset["session_id"], "alice");

    let alice: Value = query("a fresh start", "alice")
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(alice["history_depth"], 1);
    let bob: Value = query("another one", "bob")
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(bob["history_depth"], 2);
}

#[tokio::test]
async fn reset_without_body_targets_default_session() {
    let tmp = TempDir::new().unwrap();
    let addr = spawn_server(&tmp, Arc::new(RecordingLlm::default())).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{}/reset", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["session_id"], "default");
}

#[tokio::test]
async fn blank_prompt_is_a_bad_request() {
    let tmp = TempDir::new().unwrap();
    let addr = spawn_server(&tmp, Arc::new(RecordingLlm::default())).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{}/query", addr))
        .json(&json!({ "prompt": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .post(format!("http://{}/query", addr))
        .json(&json!({ "session_id": "x" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn generation_failure_maps_to_bad_gateway() {
    let tmp = TempDir::new().unwrap();
    let addr = spawn_server(&tmp, Arc::new(FailingLlm)).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{}/query", addr))
        .json(&json!({ "prompt": "healing quest" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "generation_failed");

    // The server keeps serving after a failed request.
    let health = reqwest::get(format!("http://{}/health", addr)).await.unwrap();
    assert_eq!(health.status(), 200);
}
