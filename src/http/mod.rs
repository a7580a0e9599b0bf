//! HTTP surface of the service.
//!
//! Routes:
//! - `GET /`: service description
//! - `GET /health`: upstream health, always HTTP 200
//! - `POST /ask`: answer a question

pub mod server;

pub use server::HttpServer;

use crate::db::DatabaseGateway;
use crate::error::AppError;
use crate::llm::ModelBackend;
use crate::models::{AskRequest, AskResponse, HealthResponse};
use crate::orchestrator::QueryOrchestrator;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use tracing::error;

pub const SERVICE_NAME: &str = "Natural Language SQL Query API";

/// Build the router over a shared orchestrator.
pub fn router<B, G>(orchestrator: Arc<QueryOrchestrator<B, G>>) -> Router
where
    B: ModelBackend,
    G: DatabaseGateway,
{
    Router::new()
        .route("/", get(root))
        .route("/health", get(health::<B, G>))
        .route("/ask", post(ask::<B, G>))
        .with_state(orchestrator)
}

async fn root() -> Json<JsonValue> {
    Json(json!({
        "message": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "/health",
            "ask": "/ask (POST)"
        }
    }))
}

async fn health<B, G>(
    State(orchestrator): State<Arc<QueryOrchestrator<B, G>>>,
) -> Json<HealthResponse>
where
    B: ModelBackend,
    G: DatabaseGateway,
{
    Json(orchestrator.health().await)
}

/// The pipeline runs on its own task so a client disconnect does not cancel
/// upstream calls half-way; their result is simply discarded.
async fn ask<B, G>(
    State(orchestrator): State<Arc<QueryOrchestrator<B, G>>>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<AskResponse>, AppError>
where
    B: ModelBackend,
    G: DatabaseGateway,
{
    let Json(request) = payload.map_err(|rejection| {
        AppError::input_rejected(format!("Invalid request body: {}", rejection.body_text()))
    })?;

    let task = tokio::spawn(async move { orchestrator.ask(&request.question).await });

    match task.await {
        Ok(result) => result.map(Json),
        Err(e) => {
            error!(error = %e, "Ask task failed");
            Err(AppError::internal(format!("Request task failed: {}", e)))
        }
    }
}
