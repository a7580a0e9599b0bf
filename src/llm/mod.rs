//! Text-generation backend access.
//!
//! - [`client`]: the [`ModelBackend`] seam and its Ollama HTTP implementation
//! - [`readiness`]: the startup routine that waits for the backend and pulls
//!   the model
//! - [`wire`]: JSON bodies of the Ollama API

pub mod client;
pub mod readiness;
pub mod wire;

pub use client::{BackendSettings, ModelBackend, OllamaClient, model_listed};
pub use readiness::{ReadinessHandle, StartupSettings, ensure_model_present};
pub use wire::SamplingOptions;
