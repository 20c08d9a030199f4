//! Errors that stop a batch run.
//!
//! Per-title inference failures are not in here: they are logged, checkpointed
//! and the run moves on. Only conditions that would break the checkpoint
//! guarantee (or prevent the run from starting) surface as `PipelineError`.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::db::DatabaseError;
use super::scoring::{InferenceError, PromptError};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Malformed input row at line {line}: expected {expected} columns, found {found}")]
    MalformedRow {
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("Input row at line {line} has no usable UUID: {key:?}")]
    InvalidKey { line: u64, key: String },

    #[error("Refusing to checkpoint key {0:?}: it cannot be read back unchanged")]
    CheckpointKey(String),

    #[error("Moderation store error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Prompt template error: {0}")]
    Prompt(#[from] PromptError),

    #[error("Inference client error: {0}")]
    Inference(#[from] InferenceError),
}

impl PipelineError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Errors confined to a single input row; the batch continues past them.
    pub fn is_row_local(&self) -> bool {
        match self {
            Self::MalformedRow { .. } | Self::InvalidKey { .. } => true,
            Self::Csv(e) => matches!(e.kind(), csv::ErrorKind::Utf8 { .. }),
            _ => false,
        }
    }
}
