//! Resumable title-scoring pipeline.
//!
//! ```text
//! TitleSource → classify → TitleScorer → ResultSink → CheckpointFile
//! ```
//!
//! One sequential loop, one LLM call at a time. The checkpoint only ever
//! advances after a record's outcome is durably visible (log line or
//! output row).

pub mod checkpoint;
pub mod classify;
pub mod error;
pub mod runner;
pub mod scoring;
pub mod sink;
pub mod source;

pub use checkpoint::CheckpointFile;
pub use classify::{classify, SkipDecision, SkipReason};
pub use error::PipelineError;
pub use runner::{run_full_batch, BatchRunner, BatchSummary, RecordOutcome, StopReason};
pub use scoring::{InferenceError, LlmClient, OllamaClient, PromptTemplate, TitleScore, TitleScorer};
pub use sink::{ResultSink, ScoredResult};
pub use source::{count_records, ResumePosition, TitleRecord, TitleSource};
