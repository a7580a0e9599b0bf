//! Shared fakes for integration tests.
//!
//! Each fake counts its calls so tests can assert which upstreams a request
//! reached.

#![allow(dead_code)]

use axum::Router;
use nlsql_server::db::DatabaseGateway;
use nlsql_server::error::{AppError, AppResult, Upstream};
use nlsql_server::llm::{ModelBackend, SamplingOptions};
use nlsql_server::models::{QueryResult, ValidatedQuery};
use serde_json::{Map, Value as JsonValue, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

type GenerateFn = dyn Fn() -> AppResult<String> + Send + Sync;

/// Backend whose completion is scripted by a closure.
pub struct FakeBackend {
    generate: Box<GenerateFn>,
    /// `None` makes `list_models` fail as if the backend were down
    models: Option<Vec<String>>,
    pub generate_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn completing(text: &str) -> Self {
        let text = text.to_string();
        Self::with_generate(move || Ok(text.clone()))
    }

    pub fn failing(make_error: impl Fn() -> AppError + Send + Sync + 'static) -> Self {
        Self::with_generate(move || Err(make_error()))
    }

    fn with_generate(f: impl Fn() -> AppResult<String> + Send + Sync + 'static) -> Self {
        Self {
            generate: Box::new(f),
            models: Some(vec!["qwen2.5-coder:1.5b".to_string()]),
            generate_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_models(mut self, models: &[&str]) -> Self {
        self.models = Some(models.iter().map(|m| m.to_string()).collect());
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.models = None;
        self
    }

    pub fn generate_count(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }
}

impl ModelBackend for FakeBackend {
    async fn list_models(&self) -> AppResult<Vec<String>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.models
            .clone()
            .ok_or_else(|| AppError::unavailable(Upstream::Backend, "connection refused"))
    }

    async fn pull_model(&self, _name: &str) -> AppResult<()> {
        Ok(())
    }

    async fn generate(
        &self,
        prompt: &str,
        _model: &str,
        _options: &SamplingOptions,
    ) -> AppResult<String> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        (self.generate)()
    }
}

/// Connection handed out by [`FakeGateway`].
#[derive(Debug)]
pub struct FakeConnection;

#[derive(Default)]
pub struct GatewayCalls {
    pub acquire: AtomicUsize,
    pub execute: AtomicUsize,
    pub ping: AtomicUsize,
    pub executed_sql: Mutex<Vec<String>>,
}

/// Gateway returning canned rows. Clones share call counters.
#[derive(Clone)]
pub struct FakeGateway {
    rows: Vec<Map<String, JsonValue>>,
    connect_ok: bool,
    execute_error: Option<(String, Option<String>)>,
    pub calls: Arc<GatewayCalls>,
}

impl FakeGateway {
    pub fn with_rows(rows: Vec<Map<String, JsonValue>>) -> Self {
        Self {
            rows,
            connect_ok: true,
            execute_error: None,
            calls: Arc::new(GatewayCalls::default()),
        }
    }

    /// Every connection attempt fails.
    pub fn unreachable() -> Self {
        Self {
            connect_ok: false,
            ..Self::with_rows(Vec::new())
        }
    }

    /// Execution fails with a database error.
    pub fn failing_execution(message: &str, sql_state: Option<&str>) -> Self {
        Self {
            execute_error: Some((message.to_string(), sql_state.map(String::from))),
            ..Self::with_rows(Vec::new())
        }
    }

    pub fn acquire_count(&self) -> usize {
        self.calls.acquire.load(Ordering::SeqCst)
    }

    pub fn execute_count(&self) -> usize {
        self.calls.execute.load(Ordering::SeqCst)
    }

    pub fn executed_sql(&self) -> Vec<String> {
        self.calls.executed_sql.lock().unwrap().clone()
    }
}

impl DatabaseGateway for FakeGateway {
    type Connection = FakeConnection;

    async fn acquire_connection(&self) -> AppResult<FakeConnection> {
        self.calls.acquire.fetch_add(1, Ordering::SeqCst);
        if self.connect_ok {
            Ok(FakeConnection)
        } else {
            Err(AppError::unavailable(
                Upstream::Database,
                "connection refused",
            ))
        }
    }

    async fn execute(
        &self,
        _conn: FakeConnection,
        query: &ValidatedQuery,
    ) -> AppResult<QueryResult> {
        self.calls.execute.fetch_add(1, Ordering::SeqCst);
        self.calls
            .executed_sql
            .lock()
            .unwrap()
            .push(query.as_str().to_string());

        if let Some((message, sql_state)) = &self.execute_error {
            return Err(AppError::execution(message.clone(), sql_state.clone()));
        }

        let columns = self
            .rows
            .first()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default();
        Ok(QueryResult {
            columns,
            rows: self.rows.clone(),
            execution_time_ms: 1,
            truncated: false,
        })
    }

    async fn ping(&self) -> bool {
        self.calls.ping.fetch_add(1, Ordering::SeqCst);
        self.connect_ok
    }
}

/// Rows shaped like the default `users` table.
pub fn user_rows(n: usize) -> Vec<Map<String, JsonValue>> {
    (1..=n)
        .map(|i| {
            let mut row = Map::new();
            row.insert("id".to_string(), json!(i));
            row.insert("name".to_string(), json!(format!("user{}", i)));
            row.insert("created_at".to_string(), json!("2024-01-01T00:00:00"));
            row
        })
        .collect()
}

/// Serve `app` on an ephemeral local port and return its base URL.
pub async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}
