//! BatchRunner drives the whole pipeline.
//!
//! For each record: classify → (skip | score → maybe write) → checkpoint.
//! Runs sequentially, one LLM call at a time. Per-record failures are logged
//! and checkpointed; only store, sink and checkpoint I/O failures stop the run.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{AppConfig, PolicyConfig};
use crate::db::{ModerationLookup, SqliteModerationStore};
use super::checkpoint::CheckpointFile;
use super::classify::{classify, SkipDecision, SkipReason};
use super::error::PipelineError;
use super::scoring::{warm_up_model, OllamaClient, PromptTemplate, TitleScore, TitleScorer, WarmUp};
use super::sink::{ResultSink, ScoredResult};
use super::source::{count_records, ResumePosition, TitleRecord, TitleSource};

/// Emit a progress line every this many records.
const PROGRESS_LOG_INTERVAL: u64 = 1000;

/// What happened to one record.
#[derive(Debug)]
pub enum RecordOutcome {
    /// Scored at or above the threshold and written to the sink.
    Accepted(TitleScore),
    /// Scored below the threshold; discarded.
    BelowThreshold(TitleScore),
    Skipped(SkipReason),
    TimedOut,
    /// Any other inference failure, with its message.
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Completed,
    Interrupted,
    /// Too many consecutive inference failures.
    FailureLimit,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SkipCounts {
    pub original: u64,
    pub locked: u64,
    pub hidden: u64,
    pub removed: u64,
    pub downvoted: u64,
    pub unknown: u64,
}

impl SkipCounts {
    fn record(&mut self, reason: SkipReason) {
        let slot = match reason {
            SkipReason::Original => &mut self.original,
            SkipReason::Locked => &mut self.locked,
            SkipReason::Hidden => &mut self.hidden,
            SkipReason::Removed => &mut self.removed,
            SkipReason::Downvoted => &mut self.downvoted,
            SkipReason::Unknown => &mut self.unknown,
        };
        *slot += 1;
    }

    pub fn total(&self) -> u64 {
        self.original + self.locked + self.hidden + self.removed + self.downvoted + self.unknown
    }
}

/// Counts for one run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Rows consumed by earlier runs (resume offset).
    pub resumed_offset: u64,
    pub total_titles: Option<u64>,
    /// Rows handled by this run, malformed ones included.
    pub seen: u64,
    pub accepted: u64,
    pub below_threshold: u64,
    pub timed_out: u64,
    pub failed: u64,
    pub malformed_rows: u64,
    pub skipped: SkipCounts,
    pub stop: StopReason,
    pub last_key: Option<String>,
}

impl BatchSummary {
    fn new(resumed_offset: u64, total_titles: Option<u64>) -> Self {
        Self {
            started_at: Utc::now(),
            duration_ms: 0,
            resumed_offset,
            total_titles,
            seen: 0,
            accepted: 0,
            below_threshold: 0,
            timed_out: 0,
            failed: 0,
            malformed_rows: 0,
            skipped: SkipCounts::default(),
            stop: StopReason::Completed,
            last_key: None,
        }
    }

    /// Rows accounted for across all runs.
    pub fn position(&self) -> u64 {
        self.resumed_offset + self.seen
    }

    /// Titles sent to the model this run.
    pub fn scored(&self) -> u64 {
        self.accepted + self.below_threshold + self.timed_out + self.failed
    }

    fn record(&mut self, outcome: &RecordOutcome) {
        match outcome {
            RecordOutcome::Accepted(_) => self.accepted += 1,
            RecordOutcome::BelowThreshold(_) => self.below_threshold += 1,
            RecordOutcome::Skipped(reason) => self.skipped.record(*reason),
            RecordOutcome::TimedOut => self.timed_out += 1,
            RecordOutcome::Failed(_) => self.failed += 1,
        }
    }

    /// `Progress: 12k/513k (2.3%)`, or a plain count when the total is unknown.
    pub fn progress_line(&self) -> String {
        let position = self.position();
        match self.total_titles {
            Some(total) if total > 0 => format!(
                "Progress: {}k/{}k ({:.1}%)",
                position / 1000,
                total / 1000,
                position as f64 / total as f64 * 100.0
            ),
            _ => format!("Progress: {position} titles"),
        }
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.stop {
            StopReason::Completed => "Done!",
            StopReason::Interrupted => "Interrupted.",
            StopReason::FailureLimit => "Stopped: too many consecutive inference failures.",
        };
        writeln!(f, "{status}")?;
        writeln!(f, "{}", self.progress_line())?;
        writeln!(
            f,
            "This run: {} titles in {:.1}s, {} scored ({} written, {} below threshold), {} timed out, {} failed",
            self.seen,
            self.duration_ms as f64 / 1000.0,
            self.scored(),
            self.accepted,
            self.below_threshold,
            self.timed_out,
            self.failed
        )?;
        write!(
            f,
            "Skipped: {} (original {}, locked {}, hidden {}, removed {}, downvoted {}, unknown {}), malformed rows {}",
            self.skipped.total(),
            self.skipped.original,
            self.skipped.locked,
            self.skipped.hidden,
            self.skipped.removed,
            self.skipped.downvoted,
            self.skipped.unknown,
            self.malformed_rows
        )
    }
}

/// Orchestrates a batch over borrowed resources; the caller owns and releases them.
pub struct BatchRunner<'a> {
    scorer: &'a TitleScorer,
    moderation: &'a dyn ModerationLookup,
    sink: &'a mut ResultSink,
    checkpoint: &'a CheckpointFile,
    policy: &'a PolicyConfig,
    resumed_offset: u64,
    total_titles: Option<u64>,
}

impl<'a> BatchRunner<'a> {
    pub fn new(
        scorer: &'a TitleScorer,
        moderation: &'a dyn ModerationLookup,
        sink: &'a mut ResultSink,
        checkpoint: &'a CheckpointFile,
        policy: &'a PolicyConfig,
    ) -> Self {
        Self {
            scorer,
            moderation,
            sink,
            checkpoint,
            policy,
            resumed_offset: 0,
            total_titles: None,
        }
    }

    pub fn resumed_after(mut self, rows: u64) -> Self {
        self.resumed_offset = rows;
        self
    }

    pub fn with_total(mut self, total: Option<u64>) -> Self {
        self.total_titles = total;
        self
    }

    /// Consume `records` until exhausted, cancelled, or a fatal error.
    ///
    /// `cancel` is checked before each record, so an interrupt takes effect
    /// once the in-flight title finishes.
    pub fn run<I>(&mut self, records: I, cancel: &AtomicBool) -> Result<BatchSummary, PipelineError>
    where
        I: IntoIterator<Item = Result<TitleRecord, PipelineError>>,
    {
        let start = Instant::now();
        let mut summary = BatchSummary::new(self.resumed_offset, self.total_titles);
        let backoff = Duration::from_millis(self.policy.failure_backoff_ms);
        let mut consecutive_failures = 0u32;

        for item in records {
            if cancel.load(Ordering::Relaxed) {
                summary.stop = StopReason::Interrupted;
                break;
            }
            summary.seen += 1;

            let record = match item {
                Ok(record) => record,
                Err(e) if e.is_row_local() => {
                    tracing::warn!(error = %e, "Skipping unreadable input row");
                    summary.malformed_rows += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let outcome = self.process_record(&record)?;
            summary.record(&outcome);
            summary.last_key = Some(record.uuid.clone());

            match outcome {
                RecordOutcome::Failed(_) => {
                    consecutive_failures += 1;
                    if let Some(limit) = self.policy.max_consecutive_failures {
                        if consecutive_failures >= limit {
                            tracing::error!(
                                failures = consecutive_failures,
                                "Inference keeps failing, stopping the batch"
                            );
                            summary.stop = StopReason::FailureLimit;
                            break;
                        }
                    }
                    if !backoff.is_zero() {
                        std::thread::sleep(backoff);
                    }
                }
                RecordOutcome::Accepted(_) | RecordOutcome::BelowThreshold(_) => {
                    consecutive_failures = 0;
                }
                RecordOutcome::Skipped(_) | RecordOutcome::TimedOut => {}
            }

            if summary.seen % PROGRESS_LOG_INTERVAL == 0 {
                tracing::info!(
                    accepted = summary.accepted,
                    skipped = summary.skipped.total(),
                    "{}",
                    summary.progress_line()
                );
            }
        }

        summary.duration_ms = start.elapsed().as_millis() as u64;
        Ok(summary)
    }

    /// Handle one record and advance the checkpoint to it.
    ///
    /// The checkpoint is written last: by then the outcome is already in the
    /// log or synced to the sink.
    pub fn process_record(&mut self, record: &TitleRecord) -> Result<RecordOutcome, PipelineError> {
        let outcome = match classify(record, self.moderation, self.policy)? {
            SkipDecision::Skip(reason) => {
                if reason == SkipReason::Unknown {
                    tracing::error!(
                        uuid = %record.uuid,
                        title = %record.title,
                        "Skip | no moderation flag explains this skip"
                    );
                } else {
                    tracing::info!(
                        "Skip | {:<36} | {:<10} | {}",
                        record.uuid,
                        reason.as_str(),
                        record.title
                    );
                }
                RecordOutcome::Skipped(reason)
            }
            SkipDecision::Process => self.score_record(record)?,
        };

        self.checkpoint.save(record.key())?;
        Ok(outcome)
    }

    fn score_record(&mut self, record: &TitleRecord) -> Result<RecordOutcome, PipelineError> {
        let start = Instant::now();
        match self.scorer.score(&record.title) {
            Ok(score) => {
                let accepted = score.score >= self.policy.min_score;
                if accepted {
                    self.sink.append(&ScoredResult {
                        key: record.uuid.clone(),
                        title: record.title.clone(),
                        score: score.score,
                        explanation: score.explanation.clone(),
                    })?;
                }
                tracing::info!(
                    "Done | {:<36} | {:<3} | {:>6.2}s | {}",
                    record.uuid,
                    score.score,
                    start.elapsed().as_secs_f32(),
                    record.title
                );
                Ok(if accepted {
                    RecordOutcome::Accepted(score)
                } else {
                    RecordOutcome::BelowThreshold(score)
                })
            }
            Err(e) if e.is_timeout() => {
                tracing::warn!(uuid = %record.uuid, title = %record.title, "{e}");
                Ok(RecordOutcome::TimedOut)
            }
            Err(e) => {
                tracing::warn!(
                    uuid = %record.uuid,
                    title = %record.title,
                    error = %e,
                    "Inference failed"
                );
                Ok(RecordOutcome::Failed(e.to_string()))
            }
        }
    }
}

/// Run a full batch from configuration: acquire every resource, resume from
/// the checkpoint, process to the end (or until `cancel`), release everything.
pub fn run_full_batch(config: &AppConfig, cancel: &AtomicBool) -> Result<BatchSummary, PipelineError> {
    let paths = &config.paths;

    let checkpoint = CheckpointFile::new(&paths.checkpoint);
    let saved_key = checkpoint.load()?;
    match &saved_key {
        Some(key) => tracing::info!(uuid = %key, "Finding previous position"),
        None => tracing::info!("Starting fresh (no progress checkpoint found)"),
    }

    let (source, position) = TitleSource::open(&paths.titles_csv, saved_key.as_deref())?;
    match &position {
        ResumePosition::Fresh => {}
        ResumePosition::Resumed { skipped } => tracing::info!(
            rows = skipped,
            "Previous position located, continuing from next title"
        ),
        ResumePosition::NotFound { key } => tracing::warn!(
            uuid = %key,
            "Previous position not found in input, starting from the beginning"
        ),
    }

    let total_titles = match config.total_titles {
        Some(total) => Some(total),
        None => match count_records(&paths.titles_csv) {
            Ok(total) => Some(total),
            Err(e) => {
                tracing::warn!(error = %e, "Cannot count input rows, progress will show counts only");
                None
            }
        },
    };

    let moderation = SqliteModerationStore::open(&paths.moderation_db)?;
    let template = PromptTemplate::load(&paths.prompt_template)?;
    let client = OllamaClient::new(&config.model.base_url, config.model.timeout_secs)?;
    let scorer = TitleScorer::new(Box::new(client.clone()), template, &config.model);
    scorer.check_model();

    if config.model.warm_up
        && warm_up_model(client, &config.model.model_name, cancel) == WarmUp::Cancelled
    {
        let mut summary = BatchSummary::new(position.skipped(), total_titles);
        summary.stop = StopReason::Interrupted;
        return Ok(summary);
    }

    let mut sink = ResultSink::open(&paths.output_csv)?;
    if sink.resumed() {
        tracing::info!(path = %paths.output_csv.display(), "Appending to existing output");
    }

    let mut runner = BatchRunner::new(&scorer, &moderation, &mut sink, &checkpoint, &config.policy)
        .resumed_after(position.skipped())
        .with_total(total_titles);

    runner.run(source, cancel)
}
