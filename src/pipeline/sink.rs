//! Append-only CSV output of accepted scores.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::PipelineError;

pub const OUTPUT_HEADER: [&str; 4] = ["UUID", "Title", "Score", "Explanation"];

/// One accepted scoring result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoredResult {
    pub key: String,
    pub title: String,
    pub score: i64,
    pub explanation: String,
}

pub struct ResultSink {
    writer: csv::Writer<File>,
    path: PathBuf,
    resumed: bool,
}

impl ResultSink {
    /// Open for appending. The header is written only when the file is new
    /// or empty, so resumed runs never repeat it.
    pub fn open(path: &Path) -> Result<Self, PipelineError> {
        let resumed = std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| PipelineError::io(path, e))?;

        let mut sink = Self {
            writer: csv::WriterBuilder::new().has_headers(false).from_writer(file),
            path: path.to_path_buf(),
            resumed,
        };

        if !resumed {
            sink.writer.write_record(OUTPUT_HEADER)?;
            sink.sync()?;
        }
        Ok(sink)
    }

    /// Whether the file already held output from an earlier run.
    pub fn resumed(&self) -> bool {
        self.resumed
    }

    /// Write one row and make it durable before returning.
    pub fn append(&mut self, result: &ScoredResult) -> Result<(), PipelineError> {
        let score = result.score.to_string();
        self.writer.write_record([
            result.key.as_str(),
            result.title.as_str(),
            score.as_str(),
            result.explanation.as_str(),
        ])?;
        self.sync()
    }

    fn sync(&mut self) -> Result<(), PipelineError> {
        self.writer
            .flush()
            .and_then(|_| self.writer.get_ref().sync_data())
            .map_err(|e| PipelineError::io(&self.path, e))
    }
}
