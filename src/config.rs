//! Configuration handling for the query service.
//!
//! All settings come from CLI arguments or environment variables and are
//! parsed once at startup. Per-component settings structs are derived from
//! the resulting [`Config`] and handed to constructors.

use crate::db::{DatabaseType, GatewaySettings};
use crate::db::gateway::{
    DEFAULT_CONNECT_RETRIES, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_MAX_ROWS,
    DEFAULT_QUERY_TIMEOUT_SECS, DEFAULT_RETRY_DELAY_SECS,
};
use crate::llm::client::{
    DEFAULT_GENERATE_TIMEOUT_SECS, DEFAULT_MODEL_NAME, DEFAULT_OLLAMA_URL,
    DEFAULT_PROBE_TIMEOUT_SECS, DEFAULT_PULL_TIMEOUT_SECS,
};
use crate::llm::readiness::{DEFAULT_STARTUP_ATTEMPTS, DEFAULT_STARTUP_INTERVAL_SECS};
use crate::llm::wire::{DEFAULT_TEMPERATURE, DEFAULT_TOP_P};
use crate::llm::{BackendSettings, SamplingOptions, StartupSettings};
use crate::models::DEFAULT_MAX_QUESTION_CHARS;
use crate::orchestrator::{DEFAULT_SCHEMA_DESCRIPTION, OrchestratorSettings};
use crate::sql::{KeywordClassifier, ParserClassifier, QueryClassifier};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const DEFAULT_HTTP_HOST: &str = "0.0.0.0";
pub const DEFAULT_HTTP_PORT: u16 = 3001;

pub const DEFAULT_DB_HOST: &str = "db";
pub const DEFAULT_DB_PORT: u16 = 5432;
pub const DEFAULT_DB_USER: &str = "user";
pub const DEFAULT_DB_PASSWORD: &str = "pass";
pub const DEFAULT_DB_NAME: &str = "appdb";

/// Configuration for the query service.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "nlsql-server",
    about = "Answers natural-language questions by generating and running read-only SQL",
    version,
    author
)]
pub struct Config {
    /// HTTP host to bind to
    #[arg(long, default_value = DEFAULT_HTTP_HOST, env = "HOST")]
    pub host: String,

    /// HTTP port to bind to
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT, env = "PORT")]
    pub port: u16,

    // ---------------------------------------------------------------------
    // Generation backend
    // ---------------------------------------------------------------------
    /// Base URL of the Ollama-compatible backend
    #[arg(long, default_value = DEFAULT_OLLAMA_URL, env = "OLLAMA_URL")]
    pub ollama_url: String,

    /// Model used for SQL generation
    #[arg(long, default_value = DEFAULT_MODEL_NAME, env = "MODEL_NAME")]
    pub model_name: String,

    /// Generation timeout in seconds
    #[arg(long, default_value_t = DEFAULT_GENERATE_TIMEOUT_SECS, env = "GENERATE_TIMEOUT")]
    pub generate_timeout: u64,

    /// Timeout for model listing probes in seconds
    #[arg(long, default_value_t = DEFAULT_PROBE_TIMEOUT_SECS, env = "PROBE_TIMEOUT")]
    pub probe_timeout: u64,

    /// Timeout for a model download in seconds
    #[arg(long, default_value_t = DEFAULT_PULL_TIMEOUT_SECS, env = "PULL_TIMEOUT")]
    pub pull_timeout: u64,

    /// How many times startup polls the backend before giving up
    #[arg(long, default_value_t = DEFAULT_STARTUP_ATTEMPTS, env = "STARTUP_ATTEMPTS")]
    pub startup_attempts: u32,

    /// Seconds between startup polls
    #[arg(long, default_value_t = DEFAULT_STARTUP_INTERVAL_SECS, env = "STARTUP_INTERVAL")]
    pub startup_interval: u64,

    /// Sampling temperature
    #[arg(long, default_value_t = DEFAULT_TEMPERATURE, env = "TEMPERATURE")]
    pub temperature: f32,

    /// Nucleus sampling threshold
    #[arg(long, default_value_t = DEFAULT_TOP_P, env = "TOP_P")]
    pub top_p: f32,

    // ---------------------------------------------------------------------
    // Database
    // ---------------------------------------------------------------------
    /// Database host (ignored when --database-url is set)
    #[arg(long, default_value = DEFAULT_DB_HOST, env = "DB_HOST")]
    pub db_host: String,

    /// Database port (ignored when --database-url is set)
    #[arg(long, default_value_t = DEFAULT_DB_PORT, env = "DB_PORT")]
    pub db_port: u16,

    /// Database user (ignored when --database-url is set)
    #[arg(long, default_value = DEFAULT_DB_USER, env = "DB_USER")]
    pub db_user: String,

    /// Database password (ignored when --database-url is set)
    #[arg(
        long,
        default_value = DEFAULT_DB_PASSWORD,
        env = "DB_PASSWORD",
        hide_env_values = true
    )]
    pub db_password: String,

    /// Database name (ignored when --database-url is set)
    #[arg(long, default_value = DEFAULT_DB_NAME, env = "DB_NAME")]
    pub db_name: String,

    /// Full connection URL: postgres://, mysql:// or sqlite:
    #[arg(long, value_name = "URL", env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Connection attempts per request
    #[arg(long, default_value_t = DEFAULT_CONNECT_RETRIES, env = "DB_CONNECT_RETRIES")]
    pub db_connect_retries: u32,

    /// Seconds between connection attempts
    #[arg(long, default_value_t = DEFAULT_RETRY_DELAY_SECS, env = "DB_RETRY_DELAY")]
    pub db_retry_delay: u64,

    /// Connection timeout in seconds
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS, env = "DB_CONNECT_TIMEOUT")]
    pub db_connect_timeout: u64,

    /// Statement timeout in seconds
    #[arg(long, default_value_t = DEFAULT_QUERY_TIMEOUT_SECS, env = "QUERY_TIMEOUT")]
    pub query_timeout: u64,

    /// Maximum rows returned per answer
    #[arg(long, default_value_t = DEFAULT_MAX_ROWS, env = "MAX_ROWS")]
    pub max_rows: usize,

    /// Open database sessions in read-only mode
    #[arg(
        long,
        default_value_t = true,
        action = clap::ArgAction::Set,
        env = "DB_READ_ONLY_SESSION"
    )]
    pub db_read_only_session: bool,

    // ---------------------------------------------------------------------
    // Orchestration
    // ---------------------------------------------------------------------
    /// Maximum question length in characters
    #[arg(long, default_value_t = DEFAULT_MAX_QUESTION_CHARS, env = "MAX_QUESTION_CHARS")]
    pub max_question_chars: usize,

    /// Additionally require generated SQL to parse as exactly one query
    #[arg(long, env = "STRICT_SQL")]
    pub strict_sql: bool,

    /// File whose content replaces the built-in schema description
    #[arg(long, value_name = "PATH", env = "SCHEMA_FILE")]
    pub schema_file: Option<PathBuf>,

    // ---------------------------------------------------------------------
    // Logging
    // ---------------------------------------------------------------------
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            host: DEFAULT_HTTP_HOST.to_string(),
            port: DEFAULT_HTTP_PORT,
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            model_name: DEFAULT_MODEL_NAME.to_string(),
            generate_timeout: DEFAULT_GENERATE_TIMEOUT_SECS,
            probe_timeout: DEFAULT_PROBE_TIMEOUT_SECS,
            pull_timeout: DEFAULT_PULL_TIMEOUT_SECS,
            startup_attempts: DEFAULT_STARTUP_ATTEMPTS,
            startup_interval: DEFAULT_STARTUP_INTERVAL_SECS,
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            db_host: DEFAULT_DB_HOST.to_string(),
            db_port: DEFAULT_DB_PORT,
            db_user: DEFAULT_DB_USER.to_string(),
            db_password: DEFAULT_DB_PASSWORD.to_string(),
            db_name: DEFAULT_DB_NAME.to_string(),
            database_url: None,
            db_connect_retries: DEFAULT_CONNECT_RETRIES,
            db_retry_delay: DEFAULT_RETRY_DELAY_SECS,
            db_connect_timeout: DEFAULT_CONNECT_TIMEOUT_SECS,
            query_timeout: DEFAULT_QUERY_TIMEOUT_SECS,
            max_rows: DEFAULT_MAX_ROWS,
            db_read_only_session: true,
            max_question_chars: DEFAULT_MAX_QUESTION_CHARS,
            strict_sql: false,
            schema_file: None,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }

    /// The connection URL: `DATABASE_URL` if set, otherwise a PostgreSQL URL
    /// assembled from the `DB_*` parts with credentials percent-encoded.
    pub fn database_url(&self) -> Result<String, String> {
        if let Some(url) = &self.database_url {
            return Ok(url.clone());
        }

        let mut url = Url::parse(&format!(
            "postgres://{}:{}/{}",
            self.db_host, self.db_port, self.db_name
        ))
        .map_err(|e| format!("Invalid database host or name: {e}"))?;
        url.set_username(&self.db_user)
            .map_err(|_| "Invalid database user".to_string())?;
        url.set_password(Some(&self.db_password))
            .map_err(|_| "Invalid database password".to_string())?;

        Ok(url.to_string())
    }

    /// Engine selected by the connection URL.
    pub fn database_type(&self) -> Result<DatabaseType, String> {
        let url = self.database_url()?;
        DatabaseType::from_connection_string(&url).ok_or_else(|| {
            "Unsupported DATABASE_URL scheme. Use postgres://, mysql:// or sqlite:".to_string()
        })
    }

    pub fn sampling_options(&self) -> SamplingOptions {
        SamplingOptions {
            temperature: self.temperature,
            top_p: self.top_p,
        }
    }

    pub fn backend_settings(&self) -> BackendSettings {
        BackendSettings {
            base_url: self.ollama_url.clone(),
            model: self.model_name.clone(),
            generate_timeout: Duration::from_secs(self.generate_timeout),
            probe_timeout: Duration::from_secs(self.probe_timeout),
            pull_timeout: Duration::from_secs(self.pull_timeout),
            sampling: self.sampling_options(),
        }
    }

    pub fn startup_settings(&self) -> StartupSettings {
        StartupSettings {
            model: self.model_name.clone(),
            attempts: self.startup_attempts,
            interval: Duration::from_secs(self.startup_interval),
        }
    }

    pub fn gateway_settings(&self) -> Result<GatewaySettings, String> {
        if self.db_connect_retries == 0 {
            return Err("db_connect_retries must be greater than 0".to_string());
        }
        if self.max_rows == 0 {
            return Err("max_rows must be greater than 0".to_string());
        }

        Ok(GatewaySettings {
            url: self.database_url()?,
            connect_retries: self.db_connect_retries,
            retry_delay: Duration::from_secs(self.db_retry_delay),
            connect_timeout: Duration::from_secs(self.db_connect_timeout),
            query_timeout: Duration::from_secs(self.query_timeout),
            max_rows: self.max_rows,
            read_only_session: self.db_read_only_session,
        })
    }

    /// Read the schema file, or fall back to the built-in description.
    pub fn schema_description(&self) -> Result<String, String> {
        let Some(path) = &self.schema_file else {
            return Ok(DEFAULT_SCHEMA_DESCRIPTION.to_string());
        };

        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read schema file {}: {e}", path.display()))?;
        if text.trim().is_empty() {
            return Err(format!("Schema file {} is empty", path.display()));
        }
        Ok(text)
    }

    pub fn orchestrator_settings(&self) -> Result<OrchestratorSettings, String> {
        if self.max_question_chars == 0 {
            return Err("max_question_chars must be greater than 0".to_string());
        }

        Ok(OrchestratorSettings {
            model: self.model_name.clone(),
            sampling: self.sampling_options(),
            max_question_chars: self.max_question_chars,
            schema_description: self.schema_description()?,
            dialect: self.database_type()?,
        })
    }

    /// The keyword classifier, or the parser-backed one in strict mode.
    pub fn classifier(&self) -> Result<Arc<dyn QueryClassifier>, String> {
        if self.strict_sql {
            Ok(Arc::new(ParserClassifier::new(self.database_type()?)))
        } else {
            Ok(Arc::new(KeywordClassifier::new()))
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}
