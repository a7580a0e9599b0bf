//! End-to-end tests of `/ask`, `/health` and `/` through the HTTP router,
//! with fake backend and gateway implementations.

mod common;

use common::{FakeBackend, FakeGateway, serve, user_rows};
use nlsql_server::db::DatabaseType;
use nlsql_server::error::{AppError, Upstream};
use nlsql_server::http::router;
use nlsql_server::models::StartupState;
use nlsql_server::orchestrator::{OrchestratorSettings, QueryOrchestrator};
use nlsql_server::sql::ParserClassifier;
use reqwest::StatusCode;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use tokio::sync::watch;

const MODEL: &str = "qwen2.5-coder:1.5b";

fn settings() -> OrchestratorSettings {
    OrchestratorSettings::new(MODEL)
}

async fn start(backend: Arc<FakeBackend>, gateway: FakeGateway) -> String {
    let orchestrator = QueryOrchestrator::new(backend, gateway, settings());
    serve(router(Arc::new(orchestrator))).await
}

async fn post_ask(base: &str, body: JsonValue) -> (StatusCode, JsonValue) {
    let response = reqwest::Client::new()
        .post(format!("{}/ask", base))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = response.status();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn test_fenced_completion_is_executed() {
    let backend = Arc::new(FakeBackend::completing("```sql\nSELECT * FROM users\n```"));
    let gateway = FakeGateway::with_rows(user_rows(3));
    let base = start(backend.clone(), gateway.clone()).await;

    let (status, body) = post_ask(&base, json!({"question": "list all users"})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["question"], "list all users");
    assert_eq!(body["sql"], "SELECT * FROM users");
    assert_eq!(body["row_count"], 3);
    assert_eq!(body["data"].as_array().unwrap().len(), 3);
    assert!(body.get("truncated").is_none());

    let keys: Vec<&str> = body["data"][0]
        .as_object()
        .unwrap()
        .keys()
        .map(String::as_str)
        .collect();
    assert_eq!(keys, vec!["id", "name", "created_at"]);

    assert_eq!(backend.generate_count(), 1);
    assert_eq!(gateway.executed_sql(), vec!["SELECT * FROM users".to_string()]);
}

#[tokio::test]
async fn test_write_query_rejected_without_database_call() {
    let backend = Arc::new(FakeBackend::completing("DELETE FROM users"));
    let gateway = FakeGateway::with_rows(user_rows(1));
    let base = start(backend, gateway.clone()).await;

    let (status, body) = post_ask(&base, json!({"question": "remove everyone"})).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "InputRejected");
    assert_eq!(body["sql"], "DELETE FROM users");
    assert!(body["error"].as_str().unwrap().contains("delete"));
    assert_eq!(gateway.acquire_count(), 0);
    assert_eq!(gateway.execute_count(), 0);
}

#[tokio::test]
async fn test_backend_timeout_is_503_without_sql() {
    let backend = Arc::new(FakeBackend::failing(|| {
        AppError::timeout(Upstream::Backend, 180)
    }));
    let gateway = FakeGateway::with_rows(user_rows(1));
    let base = start(backend, gateway.clone()).await;

    let (status, body) = post_ask(&base, json!({"question": "list all users"})).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], "UpstreamTimeout");
    assert!(body.get("sql").is_none());
    assert!(body["details"].as_str().unwrap().contains("loading"));
    assert_eq!(gateway.acquire_count(), 0);
}

#[tokio::test]
async fn test_database_unreachable_is_503() {
    let backend = Arc::new(FakeBackend::completing("SELECT * FROM users"));
    let gateway = FakeGateway::unreachable();
    let base = start(backend, gateway.clone()).await;

    let (status, body) = post_ask(&base, json!({"question": "list all users"})).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], "UpstreamUnavailable");
    assert!(body.get("sql").is_none());
    assert_eq!(gateway.acquire_count(), 1);
    assert_eq!(gateway.execute_count(), 0);
}

#[tokio::test]
async fn test_empty_question_skips_backend() {
    let backend = Arc::new(FakeBackend::completing("SELECT 1"));
    let gateway = FakeGateway::with_rows(Vec::new());
    let base = start(backend.clone(), gateway).await;

    for question in ["", "   ", "\n\t"] {
        let (status, body) = post_ask(&base, json!({ "question": question })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "InputRejected");
        assert_eq!(body["error"], "Question cannot be empty");
    }
    assert_eq!(backend.generate_count(), 0);
}

#[tokio::test]
async fn test_question_length_limit() {
    let backend = Arc::new(FakeBackend::completing("SELECT 1"));
    let gateway = FakeGateway::with_rows(Vec::new());
    let base = start(backend.clone(), gateway).await;

    let (status, body) = post_ask(&base, json!({ "question": "é".repeat(501) })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "InputRejected");
    assert_eq!(backend.generate_count(), 0);

    let (status, _) = post_ask(&base, json!({ "question": "é".repeat(500) })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(backend.generate_count(), 1);
}

#[tokio::test]
async fn test_malformed_body_is_input_rejected() {
    let backend = Arc::new(FakeBackend::completing("SELECT 1"));
    let base = start(backend.clone(), FakeGateway::with_rows(Vec::new())).await;

    let (status, body) = post_ask(&base, json!({"q": "missing field"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "InputRejected");

    let response = reqwest::Client::new()
        .post(format!("{}/ask", base))
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: JsonValue = response.json().await.unwrap();
    assert_eq!(body["kind"], "InputRejected");

    assert_eq!(backend.generate_count(), 0);
}

#[tokio::test]
async fn test_execution_error_carries_sql_and_state() {
    let backend = Arc::new(FakeBackend::completing("SELECT * FROM missing_table"));
    let gateway = FakeGateway::failing_execution(
        "relation \"missing_table\" does not exist",
        Some("42P01"),
    );
    let base = start(backend, gateway).await;

    let (status, body) = post_ask(&base, json!({"question": "show the missing table"})).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "ExecutionError");
    assert_eq!(body["sql"], "SELECT * FROM missing_table");
    assert_eq!(body["details"], "SQLSTATE: 42P01");
    assert!(body["error"].as_str().unwrap().contains("missing_table"));
}

#[tokio::test]
async fn test_malformed_backend_response_is_503() {
    let backend = Arc::new(FakeBackend::failing(|| {
        AppError::protocol(Upstream::Backend, "missing string `response` field")
    }));
    let base = start(backend, FakeGateway::with_rows(Vec::new())).await;

    let (status, body) = post_ask(&base, json!({"question": "list all users"})).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], "UpstreamProtocolError");
}

#[tokio::test]
async fn test_strict_classifier_blocks_chained_selects() {
    let completion = "SELECT * FROM users; SELECT * FROM users";

    let gateway = FakeGateway::with_rows(user_rows(1));
    let orchestrator = QueryOrchestrator::new(
        Arc::new(FakeBackend::completing(completion)),
        gateway.clone(),
        settings(),
    )
    .with_classifier(Arc::new(ParserClassifier::new(DatabaseType::PostgreSQL)));
    let base = serve(router(Arc::new(orchestrator))).await;

    let (status, body) = post_ask(&base, json!({"question": "users twice"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "InputRejected");
    assert_eq!(body["sql"], completion);
    assert_eq!(gateway.execute_count(), 0);
}

#[tokio::test]
async fn test_prompt_embeds_question() {
    let backend = Arc::new(FakeBackend::completing("SELECT name FROM users"));
    let orchestrator = QueryOrchestrator::new(
        backend.clone(),
        FakeGateway::with_rows(user_rows(1)),
        settings(),
    );

    let answer = orchestrator.ask("  who signed up first?  ").await.unwrap();
    assert_eq!(answer.question, "who signed up first?");

    let prompts = backend.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains(r#"Question: "who signed up first?""#));
    assert!(prompts[0].contains("- Table: users"));
}

#[tokio::test]
async fn test_health_all_ok() {
    let backend = Arc::new(FakeBackend::completing("SELECT 1").with_models(&[
        "llama3:latest",
        "qwen2.5-coder:1.5b",
    ]));
    let base = start(backend, FakeGateway::with_rows(Vec::new())).await;

    let body: JsonValue = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(
        body,
        json!({
            "status": "healthy",
            "ollama": "ok",
            "database": "ok",
            "model": MODEL
        })
    );
}

#[tokio::test]
async fn test_health_model_not_loaded() {
    let backend = Arc::new(FakeBackend::completing("SELECT 1").with_models(&["mistral:latest"]));
    let base = start(backend, FakeGateway::with_rows(Vec::new())).await;

    let body: JsonValue = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["model"], "not_loaded");
}

#[tokio::test]
async fn test_health_degraded_is_still_200() {
    let backend = Arc::new(FakeBackend::completing("SELECT 1").unreachable());
    let (_tx, rx) = watch::channel(StartupState::BackendUnreachable);
    let orchestrator = QueryOrchestrator::new(backend, FakeGateway::unreachable(), settings())
        .with_readiness(rx);
    let base = serve(router(Arc::new(orchestrator))).await;

    let response = reqwest::get(format!("{}/health", base)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: JsonValue = response.json().await.unwrap();
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["ollama"], "error");
    assert_eq!(body["database"], "error");
    assert!(body["model"].is_null());
    assert_eq!(body["startup"], "backend_unreachable");
}

#[tokio::test]
async fn test_health_tracks_readiness_changes() {
    let backend = Arc::new(FakeBackend::completing("SELECT 1"));
    let (tx, rx) = watch::channel(StartupState::Waiting);
    let orchestrator = QueryOrchestrator::new(
        backend,
        FakeGateway::with_rows(Vec::new()),
        settings(),
    )
    .with_readiness(rx);

    assert_eq!(orchestrator.health().await.startup, Some(StartupState::Waiting));
    tx.send_replace(StartupState::Ready);
    assert_eq!(orchestrator.health().await.startup, Some(StartupState::Ready));
}

#[tokio::test]
async fn test_root_lists_endpoints() {
    let base = start(
        Arc::new(FakeBackend::completing("SELECT 1")),
        FakeGateway::with_rows(Vec::new()),
    )
    .await;

    let body: JsonValue = reqwest::get(format!("{}/", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["endpoints"]["health"], "/health");
    assert_eq!(body["endpoints"]["ask"], "/ask (POST)");
}
