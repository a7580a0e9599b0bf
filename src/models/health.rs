//! Health and readiness reporting types.

use serde::{Deserialize, Serialize};

/// Reported as `model` when the backend is reachable but the model is absent.
pub const MODEL_NOT_LOADED: &str = "not_loaded";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Ok,
    Error,
}

impl ComponentStatus {
    pub fn from_ok(ok: bool) -> Self {
        if ok { Self::Ok } else { Self::Error }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// State of the background startup routine that waits for the backend and
/// makes sure the model is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupState {
    /// Polling the backend until it answers
    Waiting,
    /// Backend answered, model download in progress
    Pulling,
    Ready,
    /// Backend answered but the model could not be listed or pulled
    ModelNotLoaded,
    /// Backend never answered within the polling budget
    BackendUnreachable,
}

impl std::fmt::Display for StartupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Waiting => "waiting",
            Self::Pulling => "pulling",
            Self::Ready => "ready",
            Self::ModelNotLoaded => "model_not_loaded",
            Self::BackendUnreachable => "backend_unreachable",
        };
        f.write_str(s)
    }
}

/// Snapshot of service health, recomputed on every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub ollama: ComponentStatus,
    pub database: ComponentStatus,
    /// Model name if listed, "not_loaded" if absent, null if the backend is down
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup: Option<StartupState>,
}

impl HealthResponse {
    pub fn new(
        ollama: ComponentStatus,
        database: ComponentStatus,
        model: Option<String>,
        startup: Option<StartupState>,
    ) -> Self {
        let status = if ollama.is_ok() && database.is_ok() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        Self {
            status,
            ollama,
            database,
            model,
            startup,
        }
    }
}
