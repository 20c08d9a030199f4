//! Row source: title submissions read in file order, resumable by key.

use std::fs::File;
use std::path::Path;

use csv::{ByteRecord, StringRecord, StringRecordsIntoIter};
use serde::Serialize;

use super::checkpoint::is_valid_key;
use super::PipelineError;

/// Fixed column order of the title export.
pub const INPUT_COLUMNS: [&str; 10] = [
    "videoID",
    "title",
    "original",
    "userID",
    "service",
    "hashedVideoID",
    "timeSubmitted",
    "UUID",
    "casualMode",
    "userAgent",
];

const TITLE_COLUMN: usize = 1;
const ORIGINAL_COLUMN: usize = 2;
const UUID_COLUMN: usize = 7;

/// One submitted title. Only `uuid`, `title` and `original` drive the
/// pipeline; the rest is carried along untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TitleRecord {
    pub video_id: String,
    pub title: String,
    pub original: bool,
    pub user_id: String,
    pub service: String,
    pub hashed_video_id: String,
    pub time_submitted: String,
    pub uuid: String,
    pub casual_mode: String,
    pub user_agent: String,
}

impl TitleRecord {
    /// Unique key used for moderation lookups and checkpointing.
    pub fn key(&self) -> &str {
        &self.uuid
    }

    fn from_row(row: &StringRecord) -> Result<Self, PipelineError> {
        if row.len() < INPUT_COLUMNS.len() {
            return Err(PipelineError::MalformedRow {
                line: row.position().map(|p| p.line()).unwrap_or(0),
                expected: INPUT_COLUMNS.len(),
                found: row.len(),
            });
        }
        let uuid = row.get(UUID_COLUMN).unwrap_or_default();
        if !is_valid_key(uuid) {
            return Err(PipelineError::InvalidKey {
                line: row.position().map(|p| p.line()).unwrap_or(0),
                key: uuid.to_string(),
            });
        }
        let col = |i: usize| row.get(i).unwrap_or_default().to_string();
        Ok(Self {
            video_id: col(0),
            title: col(TITLE_COLUMN),
            original: parse_original_flag(row.get(ORIGINAL_COLUMN).unwrap_or_default()),
            user_id: col(3),
            service: col(4),
            hashed_video_id: col(5),
            time_submitted: col(6),
            uuid: col(UUID_COLUMN),
            casual_mode: col(8),
            user_agent: col(9),
        })
    }
}

/// Only an explicit "no" marks a title as non-original; anything else,
/// including an empty cell, is treated as original and never scored.
pub fn parse_original_flag(raw: &str) -> bool {
    let value = raw.trim();
    !(value == "0" || value.eq_ignore_ascii_case("false") || value.eq_ignore_ascii_case("no"))
}

/// Where reading starts relative to the saved checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumePosition {
    /// No checkpoint: start at the first data row.
    Fresh,
    /// Checkpoint found; `skipped` rows (including the checkpointed one) were consumed.
    Resumed { skipped: u64 },
    /// Checkpoint key is not in the input: restarted from the first data row.
    NotFound { key: String },
}

impl ResumePosition {
    /// Data rows already accounted for by previous runs.
    pub fn skipped(&self) -> u64 {
        match self {
            Self::Resumed { skipped } => *skipped,
            Self::Fresh | Self::NotFound { .. } => 0,
        }
    }
}

/// Forward-only iterator over the data rows of a title export.
///
/// The header row is always discarded.
pub struct TitleSource {
    rows: StringRecordsIntoIter<File>,
}

impl TitleSource {
    /// Open `path` and, if `checkpoint` is given, fast-forward past the row
    /// carrying that key. When the key never appears the file is reopened and
    /// reading starts from the first data row again.
    pub fn open(
        path: &Path,
        checkpoint: Option<&str>,
    ) -> Result<(Self, ResumePosition), PipelineError> {
        let mut rows = open_reader(path)?.into_records();

        let Some(key) = checkpoint else {
            return Ok((Self { rows }, ResumePosition::Fresh));
        };

        let mut skipped = 0u64;
        for row in rows.by_ref() {
            skipped += 1;
            // Unreadable rows still count as consumed; they were reported on the earlier pass.
            let Ok(row) = row else { continue };
            if row.get(UUID_COLUMN) == Some(key) {
                return Ok((Self { rows }, ResumePosition::Resumed { skipped }));
            }
        }

        let rows = open_reader(path)?.into_records();
        Ok((
            Self { rows },
            ResumePosition::NotFound {
                key: key.to_string(),
            },
        ))
    }
}

impl Iterator for TitleSource {
    type Item = Result<TitleRecord, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.next()?;
        Some(row.map_err(PipelineError::from).and_then(|r| TitleRecord::from_row(&r)))
    }
}

fn open_reader(path: &Path) -> Result<csv::Reader<File>, PipelineError> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    Ok(csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(file))
}

/// Count data rows (header excluded) for progress reporting.
pub fn count_records(path: &Path) -> Result<u64, PipelineError> {
    let mut reader = open_reader(path)?;
    let mut record = ByteRecord::new();
    let mut count = 0u64;
    while reader.read_byte_record(&mut record)? {
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "videoID,title,original,userID,service,hashedVideoID,timeSubmitted,UUID,casualMode,userAgent";

    fn row(uuid: &str, title: &str, original: &str) -> String {
        format!("vid-{uuid},{title},{original},user,YouTube,hash,1700000000,{uuid},0,agent")
    }

    fn write_input(dir: &Path, rows: &[String]) -> std::path::PathBuf {
        let path = dir.join("titles.csv");
        let mut text = String::from(HEADER);
        for r in rows {
            text.push('\n');
            text.push_str(r);
        }
        text.push('\n');
        std::fs::write(&path, text).unwrap();
        path
    }

    fn keys(source: TitleSource) -> Vec<String> {
        source.map(|r| r.unwrap().uuid).collect()
    }

    #[test]
    fn fresh_start_skips_header_only() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_input(tmp.path(), &[row("a", "First", "0"), row("b", "Second", "1")]);

        let (source, position) = TitleSource::open(&path, None).unwrap();
        assert_eq!(position, ResumePosition::Fresh);

        let records: Vec<TitleRecord> = source.map(Result::unwrap).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key(), "a");
        assert_eq!(records[0].title, "First");
        assert!(!records[0].original);
        assert!(records[1].original);
        assert_eq!(records[1].service, "YouTube");
    }

    #[test]
    fn resume_continues_after_checkpointed_key() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_input(
            tmp.path(),
            &[row("a", "A", "0"), row("b", "B", "0"), row("c", "C", "0")],
        );

        let (source, position) = TitleSource::open(&path, Some("b")).unwrap();
        assert_eq!(position, ResumePosition::Resumed { skipped: 2 });
        assert_eq!(keys(source), vec!["c"]);
    }

    #[test]
    fn resume_at_last_row_yields_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_input(tmp.path(), &[row("a", "A", "0"), row("b", "B", "0")]);

        let (source, position) = TitleSource::open(&path, Some("b")).unwrap();
        assert_eq!(position.skipped(), 2);
        assert!(keys(source).is_empty());
    }

    #[test]
    fn unknown_checkpoint_restarts_from_first_row() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_input(tmp.path(), &[row("a", "A", "0"), row("b", "B", "0")]);

        let (source, position) = TitleSource::open(&path, Some("zzz")).unwrap();
        assert_eq!(position, ResumePosition::NotFound { key: "zzz".into() });
        assert_eq!(position.skipped(), 0);
        assert_eq!(keys(source), vec!["a", "b"]);
    }

    #[test]
    fn quoted_titles_with_commas_survive() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_input(tmp.path(), &[row("a", "\"Wait, what? \"\"Really\"\"\"", "0")]);

        let (mut source, _) = TitleSource::open(&path, None).unwrap();
        let record = source.next().unwrap().unwrap();
        assert_eq!(record.title, "Wait, what? \"Really\"");
        assert_eq!(record.uuid, "a");
    }

    #[test]
    fn short_row_is_row_local_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_input(
            tmp.path(),
            &["only,three,cols".to_string(), row("b", "B", "0")],
        );

        let (mut source, _) = TitleSource::open(&path, None).unwrap();
        let err = source.next().unwrap().unwrap_err();
        assert!(matches!(err, PipelineError::MalformedRow { found: 3, .. }));
        assert!(err.is_row_local());
        assert_eq!(source.next().unwrap().unwrap().uuid, "b");
    }

    #[test]
    fn blank_or_multiline_uuid_is_row_local_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_input(
            tmp.path(),
            &[
                row("", "No key", "0"),
                "vid-x,Split key,0,user,YouTube,hash,1700000000,\"two\nlines\",0,agent".to_string(),
                row("with space", "Spaced key", "0"),
            ],
        );

        let (mut source, _) = TitleSource::open(&path, None).unwrap();
        let err = source.next().unwrap().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidKey { ref key, .. } if key.is_empty()));
        assert!(err.is_row_local());
        let err = source.next().unwrap().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidKey { ref key, .. } if key == "two\nlines"));
        assert_eq!(source.next().unwrap().unwrap().uuid, "with space");
    }

    #[test]
    fn invalid_utf8_row_is_row_local_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("titles.csv");
        let mut bytes = format!("{HEADER}\n{}\n", row("a", "A", "0")).into_bytes();
        bytes.extend_from_slice(b"vid,Bad \xff title,0,user,YouTube,hash,1700000000,b,0,agent\n");
        bytes.extend_from_slice(format!("{}\n", row("c", "C", "0")).as_bytes());
        std::fs::write(&path, bytes).unwrap();

        let (mut source, _) = TitleSource::open(&path, None).unwrap();
        assert_eq!(source.next().unwrap().unwrap().uuid, "a");
        let err = source.next().unwrap().unwrap_err();
        assert!(matches!(err, PipelineError::Csv(_)));
        assert!(err.is_row_local());
        assert_eq!(source.next().unwrap().unwrap().uuid, "c");
    }

    #[test]
    fn original_flag_parsing() {
        assert!(!parse_original_flag("0"));
        assert!(!parse_original_flag(" false "));
        assert!(!parse_original_flag("No"));
        assert!(parse_original_flag("1"));
        assert!(parse_original_flag("true"));
        assert!(parse_original_flag(""));
    }

    #[test]
    fn count_records_excludes_header() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_input(
            tmp.path(),
            &[row("a", "A", "0"), row("b", "B", "0"), row("c", "C", "1")],
        );
        assert_eq!(count_records(&path).unwrap(), 3);
    }

    #[test]
    fn missing_input_is_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let result = TitleSource::open(&tmp.path().join("absent.csv"), None);
        assert!(matches!(result, Err(PipelineError::Io { .. })));
    }
}
