//! Data models for the query service.
//!
//! This module re-exports all model types used throughout the application.

pub mod ask;
pub mod health;
pub mod query;

// Re-export commonly used types
pub use ask::{AskRequest, AskResponse, DEFAULT_MAX_QUESTION_CHARS, Question};
pub use health::{ComponentStatus, HealthResponse, HealthStatus, MODEL_NOT_LOADED, StartupState};
pub use query::{QueryResult, SanitizedQuery, ValidatedQuery};
