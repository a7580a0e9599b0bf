//! Error types for the query service.
//!
//! Every failure that can reach a caller is one of the kinds below. Low-level
//! transport and driver errors are converted at the client/gateway boundary,
//! keeping the original message as detail, so the HTTP layer only ever sees
//! an [`AppError`].

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// The upstream dependency an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    /// The text-generation backend (Ollama).
    Backend,
    /// The relational database.
    Database,
}

impl std::fmt::Display for Upstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Backend => write!(f, "Ollama"),
            Self::Database => write!(f, "Database"),
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    /// Empty question, malformed request, or a generated query failing the
    /// safety classifier.
    #[error("{message}")]
    InputRejected {
        message: String,
        sql: Option<String>,
    },

    #[error("{service} unavailable: {message}")]
    UpstreamUnavailable { service: Upstream, message: String },

    #[error("{service} request timed out after {elapsed_secs}s")]
    UpstreamTimeout {
        service: Upstream,
        elapsed_secs: u64,
    },

    #[error("Unexpected {service} response: {message}")]
    UpstreamProtocol { service: Upstream, message: String },

    #[error("SQL execution failed: {message}")]
    Execution {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        sql: Option<String>,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
        sql: Option<String>,
    },
}

impl AppError {
    /// Create an input rejection without SQL attached.
    pub fn input_rejected(message: impl Into<String>) -> Self {
        Self::InputRejected {
            message: message.into(),
            sql: None,
        }
    }

    /// Create a rejection for a generated query that failed classification.
    pub fn query_rejected(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::InputRejected {
            message: message.into(),
            sql: Some(sql.into()),
        }
    }

    /// Create an upstream-unavailable error.
    pub fn unavailable(service: Upstream, message: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            service,
            message: message.into(),
        }
    }

    /// Create an upstream timeout error.
    pub fn timeout(service: Upstream, elapsed_secs: u64) -> Self {
        Self::UpstreamTimeout {
            service,
            elapsed_secs,
        }
    }

    /// Create an upstream protocol error (malformed response shape).
    pub fn protocol(service: Upstream, message: impl Into<String>) -> Self {
        Self::UpstreamProtocol {
            service,
            message: message.into(),
        }
    }

    /// Create an execution error with optional SQL state.
    pub fn execution(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Execution {
            message: message.into(),
            sql_state,
            sql: None,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            sql: None,
        }
    }

    /// Attach the attempted SQL text to kinds that may expose it.
    ///
    /// Upstream availability errors never carry SQL.
    pub fn with_sql(mut self, text: impl Into<String>) -> Self {
        match &mut self {
            Self::InputRejected { sql, .. }
            | Self::Execution { sql, .. }
            | Self::Internal { sql, .. } => {
                if sql.is_none() {
                    *sql = Some(text.into());
                }
            }
            _ => {}
        }
        self
    }

    /// The taxonomy name reported to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InputRejected { .. } => "InputRejected",
            Self::UpstreamUnavailable { .. } => "UpstreamUnavailable",
            Self::UpstreamTimeout { .. } => "UpstreamTimeout",
            Self::UpstreamProtocol { .. } => "UpstreamProtocolError",
            Self::Execution { .. } => "ExecutionError",
            Self::Internal { .. } => "InternalError",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InputRejected { .. } | Self::Execution { .. } => StatusCode::BAD_REQUEST,
            Self::UpstreamUnavailable { .. }
            | Self::UpstreamTimeout { .. }
            | Self::UpstreamProtocol { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The SQL text attached to this error, if any.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::InputRejected { sql, .. }
            | Self::Execution { sql, .. }
            | Self::Internal { sql, .. } => sql.as_deref(),
            _ => None,
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::UpstreamTimeout {
                service: Upstream::Backend,
                ..
            } => Some("The model may still be loading. Retry in a moment."),
            Self::UpstreamTimeout {
                service: Upstream::Database,
                ..
            } => Some("Check database server load and connectivity"),
            Self::UpstreamUnavailable {
                service: Upstream::Backend,
                ..
            } => Some("Check that the Ollama service is running and reachable"),
            Self::UpstreamUnavailable {
                service: Upstream::Database,
                ..
            } => Some("Check network connectivity and database server status"),
            Self::Execution { .. } => Some("Rephrase the question and try again"),
            _ => None,
        }
    }

    /// Check if this error is transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable { .. } | Self::UpstreamTimeout { .. }
        )
    }

    fn details(&self) -> Option<String> {
        match self {
            Self::Execution {
                sql_state: Some(code),
                ..
            } => Some(format!("SQLSTATE: {}", code)),
            _ => self.suggestion().map(String::from),
        }
    }
}

/// Convert sqlx errors to AppError.
///
/// Connection-level failures become [`AppError::UpstreamUnavailable`];
/// failures caused by the statement itself become [`AppError::Execution`].
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                AppError::execution(db_err.message(), code)
            }
            sqlx::Error::RowNotFound => AppError::execution("No rows returned", None),
            sqlx::Error::TypeNotFound { type_name } => {
                AppError::execution(format!("Type not found: {}", type_name), None)
            }
            sqlx::Error::ColumnNotFound(col) => {
                AppError::execution(format!("Column not found: {}", col), None)
            }
            sqlx::Error::Configuration(msg) => AppError::unavailable(
                Upstream::Database,
                format!("Invalid connection configuration: {}", msg),
            ),
            sqlx::Error::PoolTimedOut => AppError::timeout(Upstream::Database, 0),
            sqlx::Error::PoolClosed => {
                AppError::unavailable(Upstream::Database, "Connection is closed")
            }
            sqlx::Error::Io(io_err) => {
                AppError::unavailable(Upstream::Database, format!("I/O error: {}", io_err))
            }
            sqlx::Error::Tls(tls_err) => {
                AppError::unavailable(Upstream::Database, format!("TLS error: {}", tls_err))
            }
            sqlx::Error::Protocol(msg) => {
                AppError::unavailable(Upstream::Database, format!("Protocol error: {}", msg))
            }
            sqlx::Error::AnyDriverError(err) => {
                AppError::unavailable(Upstream::Database, format!("Driver error: {}", err))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => AppError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                AppError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => AppError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => AppError::internal("Database worker crashed"),
            _ => AppError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for service operations.
pub type AppResult<T> = Result<T, AppError>;

/// Structured error body returned by the HTTP layer.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
}

impl From<&AppError> for ErrorResponse {
    fn from(err: &AppError) -> Self {
        Self {
            error: err.to_string(),
            kind: err.kind(),
            details: err.details(),
            sql: err.sql().map(String::from),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(ErrorResponse::from(&self))).into_response()
    }
}
