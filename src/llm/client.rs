//! HTTP client for an Ollama-compatible generation backend.

use crate::error::{AppError, AppResult, Upstream};
use crate::llm::wire::{
    GenerateRequest, PullProgress, PullRequest, SamplingOptions, TagsResponse,
};
use futures_util::StreamExt;
use humansize::{DECIMAL, format_size};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_OLLAMA_URL: &str = "http://ollama:11434";
pub const DEFAULT_MODEL_NAME: &str = "qwen2.5-coder:1.5b";
pub const DEFAULT_GENERATE_TIMEOUT_SECS: u64 = 180;
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_PULL_TIMEOUT_SECS: u64 = 600;

/// Operations the orchestrator and the startup routine need from the backend.
pub trait ModelBackend: Send + Sync + 'static {
    /// Names of the locally available models.
    fn list_models(&self) -> impl Future<Output = AppResult<Vec<String>>> + Send;

    /// Download a model, consuming the progress stream until it finishes.
    fn pull_model(&self, name: &str) -> impl Future<Output = AppResult<()>> + Send;

    /// Run one non-streaming completion and return the raw text.
    fn generate(
        &self,
        prompt: &str,
        model: &str,
        options: &SamplingOptions,
    ) -> impl Future<Output = AppResult<String>> + Send;
}

/// Whether `name` appears in `models`.
///
/// Substring match, so `llama3` matches `llama3:latest`.
pub fn model_listed(models: &[String], name: &str) -> bool {
    models.iter().any(|m| m.contains(name))
}

/// Settings for [`OllamaClient`].
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub base_url: String,
    pub model: String,
    pub generate_timeout: Duration,
    pub probe_timeout: Duration,
    pub pull_timeout: Duration,
    pub sampling: SamplingOptions,
}

impl BackendSettings {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            generate_timeout: Duration::from_secs(DEFAULT_GENERATE_TIMEOUT_SECS),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            pull_timeout: Duration::from_secs(DEFAULT_PULL_TIMEOUT_SECS),
            sampling: SamplingOptions::default(),
        }
    }
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self::new(DEFAULT_OLLAMA_URL, DEFAULT_MODEL_NAME)
    }
}

pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    settings: BackendSettings,
}

impl OllamaClient {
    pub fn new(settings: BackendSettings) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.probe_timeout)
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            settings,
        })
    }

    pub fn settings(&self) -> &BackendSettings {
        &self.settings
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Map a transport-level failure, keeping timeouts distinct.
fn request_error(err: reqwest::Error, limit: Duration) -> AppError {
    if err.is_timeout() {
        AppError::timeout(Upstream::Backend, limit.as_secs())
    } else {
        AppError::unavailable(Upstream::Backend, err.to_string())
    }
}

/// Turn a non-success status into an error carrying the body text.
async fn check_status(response: reqwest::Response) -> AppResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(AppError::unavailable(
        Upstream::Backend,
        format!("HTTP {}: {}", status, text.trim()),
    ))
}

/// Pull the string `response` field out of a generate body.
fn completion_text(body: &str) -> AppResult<String> {
    let value: serde_json::Value = serde_json::from_str(body).map_err(|e| {
        AppError::protocol(Upstream::Backend, format!("response is not JSON: {}", e))
    })?;

    value
        .get("response")
        .and_then(serde_json::Value::as_str)
        .map(String::from)
        .ok_or_else(|| {
            AppError::protocol(
                Upstream::Backend,
                format!("missing string `response` field in {}", value),
            )
        })
}

/// Log byte progress at debug level and status changes at info level.
fn log_progress(line: &PullProgress, model: &str, last_status: &mut Option<String>) {
    match (line.total, line.completed) {
        (Some(total), Some(completed)) if total > 0 => {
            debug!(
                model,
                digest = line.digest.as_deref().unwrap_or(""),
                completed = %format_size(completed, DECIMAL),
                total = %format_size(total, DECIMAL),
                "Pull progress"
            );
        }
        _ => {}
    }

    if line.status != *last_status {
        if let Some(status) = &line.status {
            info!(model, status = %status, "Pulling model");
        }
        last_status.clone_from(&line.status);
    }
}

impl ModelBackend for OllamaClient {
    async fn list_models(&self) -> AppResult<Vec<String>> {
        let limit = self.settings.probe_timeout;
        let response = self
            .client
            .get(self.url("/api/tags"))
            .timeout(limit)
            .send()
            .await
            .map_err(|e| request_error(e, limit))?;

        let response = check_status(response).await?;
        let body = response.text().await.map_err(|e| request_error(e, limit))?;
        let tags: TagsResponse = serde_json::from_str(&body).map_err(|e| {
            AppError::protocol(Upstream::Backend, format!("invalid model list: {}", e))
        })?;

        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn pull_model(&self, name: &str) -> AppResult<()> {
        let limit = self.settings.pull_timeout;
        info!(model = name, "Pulling model, this may take a few minutes");

        let response = self
            .client
            .post(self.url("/api/pull"))
            .timeout(limit)
            .json(&PullRequest { name, stream: true })
            .send()
            .await
            .map_err(|e| request_error(e, limit))?;
        let response = check_status(response).await?;

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut last_status = None;
        let mut succeeded = false;

        let mut handle_line = |raw: &[u8]| -> AppResult<()> {
            let text = String::from_utf8_lossy(raw);
            let text = text.trim();
            if text.is_empty() {
                return Ok(());
            }
            let line: PullProgress = match serde_json::from_str(text) {
                Ok(line) => line,
                Err(e) => {
                    warn!(line = %text, error = %e, "Unparseable pull progress line");
                    return Ok(());
                }
            };
            if let Some(error) = line.error.as_deref() {
                return Err(AppError::unavailable(
                    Upstream::Backend,
                    format!("Model pull failed: {}", error),
                ));
            }
            log_progress(&line, name, &mut last_status);
            if line.is_success() {
                succeeded = true;
            }
            Ok(())
        };

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| request_error(e, limit))?;
            buffer.extend_from_slice(&chunk);
            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                handle_line(&line)?;
            }
        }
        handle_line(&buffer)?;

        if !succeeded {
            return Err(AppError::protocol(
                Upstream::Backend,
                "pull stream ended without a success status",
            ));
        }

        info!(model = name, "Model ready");
        Ok(())
    }

    async fn generate(
        &self,
        prompt: &str,
        model: &str,
        options: &SamplingOptions,
    ) -> AppResult<String> {
        let limit = self.settings.generate_timeout;
        let body = GenerateRequest {
            model,
            prompt,
            stream: false,
            options: *options,
        };

        let response = self
            .client
            .post(self.url("/api/generate"))
            .timeout(limit)
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(e, limit))?;

        let response = check_status(response).await?;
        let text = response.text().await.map_err(|e| request_error(e, limit))?;
        completion_text(&text)
    }
}
