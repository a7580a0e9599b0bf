//! Request and response types for the `/ask` endpoint.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Default maximum question length, in characters.
pub const DEFAULT_MAX_QUESTION_CHARS: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskRequest {
    /// Natural language question about the database
    pub question: String,
}

impl AskRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
        }
    }
}

/// A trimmed, non-empty, length-bounded question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question(String);

impl Question {
    /// Trim and validate a raw question.
    ///
    /// Length is counted in characters, not bytes, so non-ASCII questions get
    /// the same budget.
    pub fn parse(raw: &str, max_chars: usize) -> AppResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AppError::input_rejected("Question cannot be empty"));
        }
        let len = trimmed.chars().count();
        if len > max_chars {
            return Err(AppError::input_rejected(format!(
                "Question is too long ({} characters, maximum is {})",
                len, max_chars
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for Question {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Successful answer to a question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    pub question: String,
    /// The SQL that was executed
    pub sql: String,
    /// One object per row, keys in column order
    pub data: Vec<serde_json::Map<String, JsonValue>>,
    pub row_count: usize,
    /// Present and true only when the row cap cut the result short
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}
