use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

use covenant_backend::core::config::{AppPaths, ProviderSettings, Settings};
use covenant_backend::events::{handler, Event};
use covenant_backend::state::AppState;

async fn mock_backend() -> String {
    let app = Router::new()
        .route(
            "/completion",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "completion disabled") }),
        )
        .route(
            "/v1/chat/completions",
            post(|Json(body): Json<Value>| async move {
                let prompt = body["messages"][0]["content"].as_str().unwrap_or_default();
                let answer = if prompt.contains("twenty leave days") {
                    "You get twenty days."
                } else {
                    "I don't know."
                };
                Json(json!({ "choices": [{ "message": { "content": answer } }] }))
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn app_state(root: &Path, endpoint: &str) -> Arc<AppState> {
    let docs = root.join("docs");
    fs::create_dir_all(&docs).unwrap();
    fs::write(docs.join("leave_policy.md"), "Staff receive twenty leave days per year.").unwrap();
    fs::write(docs.join("travel.txt"), "Book economy class for all flights.").unwrap();

    let settings = Settings {
        provider: ProviderSettings {
            endpoint: endpoint.to_string(),
            ..ProviderSettings::default()
        },
        ..Settings::default()
    };
    let paths = Arc::new(AppPaths::from_dirs(root.to_path_buf(), root.to_path_buf()));
    AppState::with_settings(paths, settings).unwrap()
}

fn record(state: &AppState, pattern: &str) -> Arc<Mutex<Vec<Event>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    state
        .bus
        .subscribe(
            pattern,
            handler(move |event: &Event| {
                sink.lock().unwrap().push(event.clone());
                Ok(())
            }),
        )
        .unwrap();
    seen
}

#[tokio::test]
async fn query_is_grounded_on_ingested_documents() {
    let tmp = tempfile::tempdir().unwrap();
    let endpoint = mock_backend().await;
    let state = app_state(tmp.path(), &endpoint);
    let events = record(&state, "run.*");

    let report = state.ingest_docs_dir().await.unwrap().unwrap();
    assert_eq!(report.ingested, 2);

    let result = state.orchestrator.run_query("how many leave days", 5).await;

    assert!(result.ok, "{:?}", result.error);
    assert_eq!(result.answer, "You get twenty days.");
    assert_eq!(result.citations.len(), 1);
    assert_eq!(result.citations[0].title, "leave policy");
    assert!(result.citations[0].path.ends_with("leave_policy.md"));

    let topics: Vec<String> = events
        .lock()
        .unwrap()
        .iter()
        .map(|e| e.topic().to_string())
        .collect();
    assert_eq!(topics, vec!["run.started", "run.completed"]);
}

#[tokio::test]
async fn unreachable_backend_degrades_to_diagnostic_answer() {
    let tmp = tempfile::tempdir().unwrap();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let state = app_state(tmp.path(), &endpoint);
    state.ingest_docs_dir().await.unwrap();

    let result = state.orchestrator.run_query("economy flights", 5).await;

    assert!(result.ok);
    assert!(result.answer.starts_with("[Provider error: "), "{}", result.answer);
    assert_eq!(result.citations.len(), 1);

    let health = state.provider.health().await;
    assert!(!health.ok);
    assert!(health.reason.is_some());
}

#[tokio::test]
async fn unconfigured_backend_answers_without_network() {
    let tmp = tempfile::tempdir().unwrap();
    let state = app_state(tmp.path(), "");

    let result = state.orchestrator.run_query("leave", 5).await;

    assert!(result.ok);
    assert_eq!(result.answer, "[MODEL_ENDPOINT not configured]");
}

#[tokio::test]
async fn background_worker_delivers_enqueued_events_in_order() {
    let tmp = tempfile::tempdir().unwrap();
    let state = app_state(tmp.path(), "");
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    state
        .bus
        .subscribe(
            "audit.*",
            handler(move |event: &Event| {
                let _ = tx.send(event.payload["n"].clone());
                Ok(())
            }),
        )
        .unwrap();

    for n in 0..5 {
        state.bus.enqueue("audit.tick", json!({ "n": n }), Value::Null).await.unwrap();
    }
    state.start();

    let mut received = Vec::new();
    for _ in 0..5 {
        let value = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        received.push(value);
    }
    state.shutdown().await;

    assert_eq!(received, (0..5).map(|n| json!(n)).collect::<Vec<_>>());
    assert_eq!(state.bus.dropped_count(), 0);
}

#[tokio::test]
async fn ingest_request_round_trips_through_the_bus() {
    let tmp = tempfile::tempdir().unwrap();
    let state = app_state(tmp.path(), "");
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    state
        .bus
        .subscribe(
            "ingest.completed",
            handler(move |event: &Event| {
                let _ = tx.send(event.payload.clone());
                Ok(())
            }),
        )
        .unwrap();

    let docs = tmp.path().join("docs");
    let result = state.orchestrator.ingest_path(&docs.display().to_string());
    assert!(result.ok);
    assert!(result.answer.starts_with("Ingestion requested for: "));

    let payload = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payload["ingested"], 2);

    let hits = state.orchestrator.run_query("economy", 5).await;
    assert_eq!(hits.citations.len(), 1);
}
