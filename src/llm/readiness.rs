//! Startup readiness: wait for the backend, then make sure the model exists.
//!
//! The routine runs on a background task so the HTTP server can start
//! immediately. Its progress is published through a `watch` channel that the
//! health endpoint reads.

use crate::error::AppResult;
use crate::llm::client::{ModelBackend, model_listed};
use crate::models::StartupState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub const DEFAULT_STARTUP_ATTEMPTS: u32 = 60;
pub const DEFAULT_STARTUP_INTERVAL_SECS: u64 = 2;

/// Settings for the startup routine.
#[derive(Debug, Clone)]
pub struct StartupSettings {
    pub model: String,
    pub attempts: u32,
    pub interval: Duration,
}

impl StartupSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            attempts: DEFAULT_STARTUP_ATTEMPTS,
            interval: Duration::from_secs(DEFAULT_STARTUP_INTERVAL_SECS),
        }
    }
}

/// Outcome of [`ensure_model_present`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelPresence {
    AlreadyPresent,
    Pulled,
}

/// Pull `name` unless the backend already lists it.
pub async fn ensure_model_present<B: ModelBackend>(
    backend: &B,
    name: &str,
) -> AppResult<ModelPresence> {
    ensure_model_with(backend, name, || {}).await
}

/// Like [`ensure_model_present`], calling `before_pull` only when a pull
/// actually starts.
async fn ensure_model_with<B: ModelBackend>(
    backend: &B,
    name: &str,
    before_pull: impl FnOnce(),
) -> AppResult<ModelPresence> {
    let models = backend.list_models().await?;
    if model_listed(&models, name) {
        info!(model = name, "Model already available");
        return Ok(ModelPresence::AlreadyPresent);
    }

    before_pull();
    backend.pull_model(name).await?;
    Ok(ModelPresence::Pulled)
}

/// Poll `list_models` until the backend answers or the attempts run out.
///
/// Returns the number of the successful attempt.
pub async fn wait_for_backend<B: ModelBackend>(
    backend: &B,
    settings: &StartupSettings,
) -> Option<u32> {
    let attempts = settings.attempts.max(1);
    for attempt in 1..=attempts {
        match backend.list_models().await {
            Ok(_) => {
                info!(attempt, "Ollama is ready");
                return Some(attempt);
            }
            Err(e) => {
                info!(attempt, max_attempts = attempts, error = %e, "Waiting for Ollama");
                if attempt < attempts {
                    tokio::time::sleep(settings.interval).await;
                }
            }
        }
    }
    None
}

/// Run the whole startup routine, publishing each state transition.
pub async fn run<B: ModelBackend>(
    backend: Arc<B>,
    settings: StartupSettings,
    state: watch::Sender<StartupState>,
) -> StartupState {
    state.send_replace(StartupState::Waiting);

    let final_state = if wait_for_backend(backend.as_ref(), &settings).await.is_none() {
        error!(
            attempts = settings.attempts,
            "Ollama failed to start; /ask will fail until it is reachable"
        );
        StartupState::BackendUnreachable
    } else {
        let pulling = || {
            state.send_replace(StartupState::Pulling);
        };
        match ensure_model_with(backend.as_ref(), &settings.model, pulling).await {
            Ok(_) => StartupState::Ready,
            Err(e) => {
                warn!(model = %settings.model, error = %e, "Model is not available");
                StartupState::ModelNotLoaded
            }
        }
    };

    state.send_replace(final_state);
    info!(state = %final_state, "Startup routine finished");
    final_state
}

/// Handle to the background startup task.
pub struct ReadinessHandle {
    state: watch::Receiver<StartupState>,
    task: JoinHandle<StartupState>,
}

impl ReadinessHandle {
    /// A receiver observing the current readiness state.
    pub fn subscribe(&self) -> watch::Receiver<StartupState> {
        self.state.clone()
    }

    pub fn current(&self) -> StartupState {
        *self.state.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the routine if it is still running.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Wait for the routine to finish. `None` if it was aborted.
    pub async fn join(self) -> Option<StartupState> {
        self.task.await.ok()
    }
}

/// Start the routine on a background task.
pub fn spawn<B: ModelBackend>(backend: Arc<B>, settings: StartupSettings) -> ReadinessHandle {
    let (tx, rx) = watch::channel(StartupState::Waiting);
    let task = tokio::spawn(run(backend, settings, tx));
    ReadinessHandle { state: rx, task }
}
