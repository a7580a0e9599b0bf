//! Request and response bodies of the Ollama HTTP API.

use serde::{Deserialize, Serialize};

pub const DEFAULT_TEMPERATURE: f32 = 0.1;
pub const DEFAULT_TOP_P: f32 = 0.9;

/// Sampling options passed with every generation request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingOptions {
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
        }
    }
}

/// `POST /api/generate` body. Streaming is always off.
#[derive(Debug, Serialize)]
pub struct GenerateRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub stream: bool,
    pub options: SamplingOptions,
}

/// `POST /api/pull` body.
#[derive(Debug, Serialize)]
pub struct PullRequest<'a> {
    pub name: &'a str,
    pub stream: bool,
}

/// `GET /api/tags` response.
#[derive(Debug, Default, Deserialize)]
pub struct TagsResponse {
    #[serde(default)]
    pub models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
pub struct ModelTag {
    #[serde(default)]
    pub name: String,
}

/// One line of the newline-delimited pull progress stream.
#[derive(Debug, Default, Deserialize)]
pub struct PullProgress {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub digest: Option<String>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub completed: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl PullProgress {
    pub fn is_success(&self) -> bool {
        self.status.as_deref() == Some("success")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_request_shape() {
        let body = GenerateRequest {
            model: "qwen2.5-coder:1.5b",
            prompt: "hi",
            stream: false,
            options: SamplingOptions::default(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "qwen2.5-coder:1.5b");
        assert_eq!(json["stream"], false);
        let temperature = json["options"]["temperature"].as_f64().unwrap();
        assert!((temperature - 0.1).abs() < 1e-6);
        let top_p = json["options"]["top_p"].as_f64().unwrap();
        assert!((top_p - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_tags_response_tolerates_missing_fields() {
        let tags: TagsResponse = serde_json::from_str("{}").unwrap();
        assert!(tags.models.is_empty());

        let tags: TagsResponse =
            serde_json::from_str(r#"{"models":[{"name":"llama3:latest","size":1},{}]}"#).unwrap();
        assert_eq!(tags.models.len(), 2);
        assert_eq!(tags.models[0].name, "llama3:latest");
        assert_eq!(tags.models[1].name, "");
    }

    #[test]
    fn test_pull_progress_lines() {
        let line: PullProgress = serde_json::from_str(
            r#"{"status":"pulling abc","digest":"sha256:abc","total":100,"completed":40}"#,
        )
        .unwrap();
        assert_eq!(line.total, Some(100));
        assert!(!line.is_success());

        let done: PullProgress = serde_json::from_str(r#"{"status":"success"}"#).unwrap();
        assert!(done.is_success());

        let failed: PullProgress = serde_json::from_str(r#"{"error":"model not found"}"#).unwrap();
        assert_eq!(failed.error.as_deref(), Some("model not found"));
    }
}
