//! Tests of the real Ollama client against a fake Ollama server.

mod common;

use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use common::serve;
use nlsql_server::llm::readiness::{self, ModelPresence, StartupSettings};
use nlsql_server::llm::{
    BackendSettings, ModelBackend, OllamaClient, SamplingOptions, ensure_model_present,
};
use nlsql_server::models::StartupState;
use serde_json::{Value as JsonValue, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

const MODEL: &str = "qwen2.5-coder:1.5b";

fn client(base: &str) -> OllamaClient {
    let mut settings = BackendSettings::new(base, MODEL);
    settings.generate_timeout = Duration::from_millis(300);
    settings.probe_timeout = Duration::from_secs(2);
    settings.pull_timeout = Duration::from_secs(5);
    OllamaClient::new(settings).unwrap()
}

fn tags(names: &[&str]) -> Router {
    let body = json!({
        "models": names.iter().map(|n| json!({"name": n, "size": 1})).collect::<Vec<_>>()
    });
    Router::new().route("/api/tags", get(move || async move { Json(body) }))
}

fn ndjson(lines: &[JsonValue]) -> impl IntoResponse + Clone + use<> {
    let body: String = lines.iter().map(|l| format!("{}\n", l)).collect();
    ([(header::CONTENT_TYPE, "application/x-ndjson")], body)
}

#[tokio::test]
async fn test_list_models() {
    let base = serve(tags(&["llama3:latest", MODEL])).await;
    let models = client(&base).list_models().await.unwrap();
    assert_eq!(models, vec!["llama3:latest".to_string(), MODEL.to_string()]);
}

#[tokio::test]
async fn test_generate_sends_expected_body() {
    let seen: Arc<Mutex<Option<JsonValue>>> = Arc::new(Mutex::new(None));
    let captured = seen.clone();
    let app = Router::new().route(
        "/api/generate",
        post(move |Json(body): Json<JsonValue>| {
            let captured = captured.clone();
            async move {
                *captured.lock().unwrap() = Some(body);
                Json(json!({"model": MODEL, "response": "SELECT 1", "done": true}))
            }
        }),
    );
    let base = serve(app).await;

    let text = client(&base)
        .generate("the prompt", MODEL, &SamplingOptions::default())
        .await
        .unwrap();
    assert_eq!(text, "SELECT 1");

    let body = seen.lock().unwrap().clone().unwrap();
    assert_eq!(body["model"], MODEL);
    assert_eq!(body["prompt"], "the prompt");
    assert_eq!(body["stream"], false);
    assert!((body["options"]["temperature"].as_f64().unwrap() - 0.1).abs() < 1e-6);
    assert!((body["options"]["top_p"].as_f64().unwrap() - 0.9).abs() < 1e-6);
}

#[tokio::test]
async fn test_generate_timeout() {
    let app = Router::new().route(
        "/api/generate",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Json(json!({"response": "SELECT 1"}))
        }),
    );
    let base = serve(app).await;

    let err = client(&base)
        .generate("p", MODEL, &SamplingOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "UpstreamTimeout");
}

#[tokio::test]
async fn test_generate_error_status() {
    let app = Router::new().route(
        "/api/generate",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "model crashed") }),
    );
    let base = serve(app).await;

    let err = client(&base)
        .generate("p", MODEL, &SamplingOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "UpstreamUnavailable");
    assert!(err.to_string().contains("model crashed"));
}

#[tokio::test]
async fn test_generate_missing_response_field() {
    let app = Router::new().route(
        "/api/generate",
        post(|| async { Json(json!({"done": true})) }),
    );
    let base = serve(app).await;

    let err = client(&base)
        .generate("p", MODEL, &SamplingOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "UpstreamProtocolError");
}

#[tokio::test]
async fn test_unreachable_backend() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(&format!("http://{}", addr))
        .list_models()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "UpstreamUnavailable");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_pull_stream_success() {
    let response = ndjson(&[
        json!({"status": "pulling manifest"}),
        json!({
            "status": "pulling abc",
            "digest": "sha256:abc",
            "total": 1_000_000,
            "completed": 250_000
        }),
        json!({
            "status": "pulling abc",
            "digest": "sha256:abc",
            "total": 1_000_000,
            "completed": 1_000_000
        }),
        json!({"status": "verifying sha256 digest"}),
        json!({"status": "success"}),
    ]);
    let app = Router::new().route("/api/pull", post(move || async move { response }));
    let base = serve(app).await;

    client(&base).pull_model(MODEL).await.unwrap();
}

#[tokio::test]
async fn test_pull_stream_error_line() {
    let response = ndjson(&[
        json!({"status": "pulling manifest"}),
        json!({"error": "pull model manifest: file does not exist"}),
    ]);
    let app = Router::new().route("/api/pull", post(move || async move { response }));
    let base = serve(app).await;

    let err = client(&base).pull_model("no-such-model").await.unwrap_err();
    assert_eq!(err.kind(), "UpstreamUnavailable");
    assert!(err.to_string().contains("file does not exist"));
}

#[tokio::test]
async fn test_pull_stream_without_success() {
    let response = ndjson(&[json!({"status": "pulling manifest"})]);
    let app = Router::new().route("/api/pull", post(move || async move { response }));
    let base = serve(app).await;

    let err = client(&base).pull_model(MODEL).await.unwrap_err();
    assert_eq!(err.kind(), "UpstreamProtocolError");
}

#[tokio::test]
async fn test_ensure_model_present_pulls_when_missing() {
    let pulled: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = pulled.clone();
    let app = tags(&["llama3:latest"]).route(
        "/api/pull",
        post(move |Json(body): Json<JsonValue>| {
            let recorder = recorder.clone();
            async move {
                recorder
                    .lock()
                    .unwrap()
                    .push(body["name"].as_str().unwrap_or_default().to_string());
                ndjson(&[json!({"status": "success"})])
            }
        }),
    );
    let base = serve(app).await;

    let presence = ensure_model_present(&client(&base), MODEL).await.unwrap();
    assert_eq!(presence, ModelPresence::Pulled);
    assert_eq!(*pulled.lock().unwrap(), vec![MODEL.to_string()]);

    let presence = ensure_model_present(&client(&base), "llama3").await.unwrap();
    assert_eq!(presence, ModelPresence::AlreadyPresent);
}

#[tokio::test]
async fn test_startup_routine_against_server() {
    let base = serve(tags(&[MODEL])).await;
    let settings = StartupSettings {
        model: MODEL.to_string(),
        attempts: 3,
        interval: Duration::from_millis(10),
    };

    let handle = readiness::spawn(Arc::new(client(&base)), settings);
    let rx = handle.subscribe();
    assert_eq!(handle.join().await, Some(StartupState::Ready));
    assert_eq!(*rx.borrow(), StartupState::Ready);
}
