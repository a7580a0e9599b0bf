//! The question-to-rows pipeline.
//!
//! [`QueryOrchestrator::ask`] walks a question through generation,
//! sanitizing, classification and execution. Every stage either hands a more
//! trusted value to the next one or ends the request with an [`AppError`].
//! Nothing here retries: only connection acquisition (in the gateway) and the
//! startup routine do.

pub mod prompt;

use crate::db::{DatabaseGateway, DatabaseType};
use crate::error::{AppError, AppResult};
use crate::llm::{ModelBackend, SamplingOptions, model_listed};
use crate::models::{
    AskResponse, ComponentStatus, DEFAULT_MAX_QUESTION_CHARS, HealthResponse, MODEL_NOT_LOADED,
    Question, StartupState,
};
use crate::sql::{KeywordClassifier, QueryClassifier, sanitize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{Instrument, debug, info, info_span, warn};

pub use prompt::{DEFAULT_SCHEMA_DESCRIPTION, build_prompt};

/// Settings for [`QueryOrchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub model: String,
    pub sampling: SamplingOptions,
    pub max_question_chars: usize,
    pub schema_description: String,
    /// SQL dialect named in the prompt
    pub dialect: DatabaseType,
}

impl OrchestratorSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            sampling: SamplingOptions::default(),
            max_question_chars: DEFAULT_MAX_QUESTION_CHARS,
            schema_description: DEFAULT_SCHEMA_DESCRIPTION.to_string(),
            dialect: DatabaseType::PostgreSQL,
        }
    }
}

/// Pipeline stages, logged as the request advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AskStage {
    ReceivingInput,
    Generating,
    Sanitizing,
    Validating,
    Executing,
    Responding,
}

pub struct QueryOrchestrator<B, G> {
    backend: Arc<B>,
    gateway: G,
    classifier: Arc<dyn QueryClassifier>,
    settings: OrchestratorSettings,
    readiness: Option<watch::Receiver<StartupState>>,
}

impl<B, G> QueryOrchestrator<B, G>
where
    B: ModelBackend,
    G: DatabaseGateway,
{
    pub fn new(backend: Arc<B>, gateway: G, settings: OrchestratorSettings) -> Self {
        Self {
            backend,
            gateway,
            classifier: Arc::new(KeywordClassifier::new()),
            settings,
            readiness: None,
        }
    }

    /// Replace the default keyword classifier.
    pub fn with_classifier(mut self, classifier: Arc<dyn QueryClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Report the startup routine's state in [`health`](Self::health).
    pub fn with_readiness(mut self, readiness: watch::Receiver<StartupState>) -> Self {
        self.readiness = Some(readiness);
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn classifier_name(&self) -> &'static str {
        self.classifier.name()
    }

    /// Answer one question.
    pub async fn ask(&self, raw_question: &str) -> AppResult<AskResponse> {
        let request_id = uuid::Uuid::new_v4();
        self.run_pipeline(raw_question)
            .instrument(info_span!("ask", %request_id))
            .await
    }

    async fn run_pipeline(&self, raw_question: &str) -> AppResult<AskResponse> {
        let start = Instant::now();

        debug!(stage = ?AskStage::ReceivingInput, "Validating question");
        let question = Question::parse(raw_question, self.settings.max_question_chars)
            .inspect_err(|e| info!(error = %e, "Question rejected"))?;

        debug!(stage = ?AskStage::Generating, model = %self.settings.model, "Generating SQL");
        info!(question = %question, "Generating SQL for question");
        let prompt = build_prompt(
            &question,
            &self.settings.schema_description,
            self.settings.dialect,
        );
        let completion = self
            .backend
            .generate(&prompt, &self.settings.model, &self.settings.sampling)
            .await
            .inspect_err(|e| warn!(error = %e, kind = e.kind(), "SQL generation failed"))?;

        debug!(stage = ?AskStage::Sanitizing, raw = %completion, "Sanitizing completion");
        let sanitized = sanitize(&completion);
        info!(sql = %sanitized, "Generated SQL");

        debug!(
            stage = ?AskStage::Validating,
            classifier = self.classifier.name(),
            "Classifying query"
        );
        let attempted = sanitized.as_str().to_string();
        let validated = self.classifier.classify(sanitized).map_err(|rejection| {
            warn!(sql = %attempted, reason = %rejection, "Generated query rejected");
            AppError::query_rejected(rejection.to_string(), attempted.as_str())
        })?;

        debug!(stage = ?AskStage::Executing, "Executing query");
        let conn = self.gateway.acquire_connection().await?;
        let result = self
            .gateway
            .execute(conn, &validated)
            .await
            .map_err(|e| e.with_sql(validated.as_str()))
            .inspect_err(|e| warn!(error = %e, kind = e.kind(), "Query execution failed"))?;

        debug!(stage = ?AskStage::Responding, "Building response");
        let row_count = result.row_count();
        info!(
            rows = row_count,
            truncated = result.truncated,
            query_ms = result.execution_time_ms,
            total_ms = start.elapsed().as_millis() as u64,
            "Query successful"
        );

        Ok(AskResponse {
            question: question.into_inner(),
            sql: validated.into_string(),
            data: result.rows,
            row_count,
            truncated: result.truncated,
        })
    }

    /// Probe both upstreams concurrently. Never cached.
    pub async fn health(&self) -> HealthResponse {
        let (models, database_ok) =
            tokio::join!(self.backend.list_models(), self.gateway.ping());

        let (ollama, model) = match models {
            Ok(models) => {
                let model = if model_listed(&models, &self.settings.model) {
                    self.settings.model.clone()
                } else {
                    MODEL_NOT_LOADED.to_string()
                };
                (ComponentStatus::Ok, Some(model))
            }
            Err(e) => {
                warn!(error = %e, "Ollama health check failed");
                (ComponentStatus::Error, None)
            }
        };

        if !database_ok {
            warn!("Database health check failed");
        }

        let startup = self.readiness.as_ref().map(|rx| *rx.borrow());
        HealthResponse::new(ollama, ComponentStatus::from_ok(database_ok), model, startup)
    }
}
