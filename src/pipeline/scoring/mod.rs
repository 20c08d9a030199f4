pub mod ollama;
pub mod prompt;
pub mod scorer;
pub mod types;

pub use ollama::*;
pub use prompt::*;
pub use scorer::*;
pub use types::*;

use thiserror::Error;

/// Failure of a single scoring call.
///
/// The kind is decided where the HTTP call fails, so callers can branch on
/// `Timeout` without looking at message text.
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Ollama is not reachable at {0}")]
    Connection(String),

    #[error("Ollama returned error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    Http(String),

    #[error("Malformed model response: {0}")]
    MalformedResponse(String),
}

impl InferenceError {
    /// Timeouts are expected under load; everything else may mean a broken service.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
