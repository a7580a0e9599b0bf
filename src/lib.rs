//! Natural-language SQL query service.
//!
//! This library turns a free-text question into a single read-only SQL query
//! using an Ollama-compatible backend, checks that the query is safe to run,
//! executes it (PostgreSQL, MySQL or SQLite) and returns the rows as JSON.

pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod sql;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use orchestrator::QueryOrchestrator;
