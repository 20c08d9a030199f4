use serde::{Deserialize, Serialize};

use super::InferenceError;

/// Generation parameters sent under `options`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateOptions {
    pub num_ctx: u32,
    pub temperature: f32,
}

/// Request body for Ollama `/api/generate`.
#[derive(Debug, Serialize)]
pub struct GenerateRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub stream: bool,
    pub options: &'a GenerateOptions,
    /// JSON schema the model output is constrained to.
    pub format: &'a serde_json::Value,
}

/// What the model must return for every title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TitleScore {
    pub score: i64,
    pub explanation: String,
}

impl TitleScore {
    /// Strictly decode the model's `response` string.
    pub fn decode(raw: &str) -> Result<Self, InferenceError> {
        serde_json::from_str(raw.trim()).map_err(|e| {
            InferenceError::MalformedResponse(format!("{e} in {:?}", truncate(raw, 200)))
        })
    }
}

/// JSON schema passed as `format` so the model can only answer
/// `{"score": <int>, "explanation": <string>}`.
pub fn score_format_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "score": { "type": "integer" },
            "explanation": { "type": "string" }
        },
        "required": ["score", "explanation"]
    })
}

/// Seam between the pipeline and the inference server.
pub trait LlmClient {
    /// Run one non-streaming generation and return the raw `response` text.
    fn generate(&self, request: &GenerateRequest<'_>) -> Result<String, InferenceError>;

    fn list_models(&self) -> Result<Vec<String>, InferenceError>;

    fn is_model_available(&self, model: &str) -> Result<bool, InferenceError> {
        let models = self.list_models()?;
        Ok(models.iter().any(|m| m == model || m.starts_with(&format!("{model}:"))))
    }

    /// Ask the server to load `model` into memory.
    fn warm_up(&self, model: &str) -> Result<(), InferenceError>;
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
