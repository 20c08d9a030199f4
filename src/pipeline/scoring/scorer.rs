//! Title scoring: sanitize → render prompt → generate → strict decode.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use crate::config::ModelConfig;
use super::prompt::{sanitize_title, PromptTemplate};
use super::types::{score_format_schema, GenerateOptions, GenerateRequest, LlmClient, TitleScore};
use super::InferenceError;

/// How often a warm-up wait checks for an interrupt.
const CANCEL_POLL: Duration = Duration::from_millis(100);

pub struct TitleScorer {
    client: Box<dyn LlmClient>,
    template: PromptTemplate,
    model_name: String,
    options: GenerateOptions,
    format: serde_json::Value,
}

impl TitleScorer {
    pub fn new(client: Box<dyn LlmClient>, template: PromptTemplate, model: &ModelConfig) -> Self {
        Self {
            client,
            template,
            model_name: model.model_name.clone(),
            options: GenerateOptions {
                num_ctx: model.num_ctx,
                temperature: model.temperature,
            },
            format: score_format_schema(),
        }
    }

    /// Score one raw title. One HTTP call, no retries.
    pub fn score(&self, title: &str) -> Result<TitleScore, InferenceError> {
        let prompt = self.template.render(&sanitize_title(title));
        let request = GenerateRequest {
            model: &self.model_name,
            prompt: &prompt,
            stream: false,
            options: &self.options,
            format: &self.format,
        };

        let raw = self.client.generate(&request)?;
        TitleScore::decode(&raw)
    }

    /// Report whether the model is installed before the batch starts.
    /// Never fatal: the batch itself reports per-title failures.
    pub fn check_model(&self) {
        match self.client.is_model_available(&self.model_name) {
            Ok(true) => tracing::info!(model = %self.model_name, "Model is installed"),
            Ok(false) => tracing::warn!(
                model = %self.model_name,
                "Model is not installed on the inference server; scoring calls will fail"
            ),
            Err(e) => tracing::warn!(error = %e, "Cannot list models on the inference server"),
        }
    }
}

/// How a background warm-up ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmUp {
    Loaded,
    Failed,
    /// `cancel` was set before the model finished loading.
    Cancelled,
}

/// Load `model` on a worker thread while watching `cancel`.
///
/// On cancellation the worker is left to finish on its own; the caller is
/// about to return and nothing reads its result.
pub fn warm_up_model<C>(client: C, model: &str, cancel: &AtomicBool) -> WarmUp
where
    C: LlmClient + Send + 'static,
{
    let start = Instant::now();
    tracing::info!(model = %model, "Warming up model (may take a while)");

    let (tx, rx) = mpsc::channel();
    let name = model.to_string();
    std::thread::spawn(move || {
        let _ = tx.send(client.warm_up(&name));
    });

    loop {
        if cancel.load(Ordering::Relaxed) {
            tracing::info!(model = %model, "Warm-up abandoned on interrupt");
            return WarmUp::Cancelled;
        }
        match rx.recv_timeout(CANCEL_POLL) {
            Ok(Ok(())) => {
                tracing::info!(model = %model, secs = start.elapsed().as_secs_f32(), "Model loaded");
                return WarmUp::Loaded;
            }
            Ok(Err(e)) => {
                tracing::warn!(model = %model, error = %e, "Model warm-up failed");
                return WarmUp::Failed;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                tracing::warn!(model = %model, "Model warm-up thread ended without a result");
                return WarmUp::Failed;
            }
        }
    }
}
