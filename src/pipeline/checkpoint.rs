//! Single-key progress checkpoint.
//!
//! The file holds exactly the key of the last record whose outcome is
//! durably recorded. It is replaced atomically on every save so a crash
//! mid-write leaves either the old key or the new one, never a torn file.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::PipelineError;

pub struct CheckpointFile {
    path: PathBuf,
}

impl CheckpointFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the saved key. Missing, empty or malformed files all mean
    /// "no checkpoint"; only real I/O failures are errors.
    ///
    /// Returns exactly what `save` wrote. A single trailing line break is
    /// tolerated for hand-edited files.
    pub fn load(&self) -> Result<Option<String>, PipelineError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                tracing::warn!(path = %self.path.display(), "Checkpoint is not valid UTF-8, ignoring");
                return Ok(None);
            }
            Err(e) => return Err(PipelineError::io(&self.path, e)),
        };

        let key = parse_key(&raw);
        if key.is_none() && !raw.trim().is_empty() {
            tracing::warn!(path = %self.path.display(), "Checkpoint content is malformed, ignoring");
        }
        Ok(key)
    }

    /// Overwrite the checkpoint with `key`.
    ///
    /// Keys that `load` could not return unchanged are refused.
    pub fn save(&self, key: &str) -> Result<(), PipelineError> {
        if !is_valid_key(key) {
            return Err(PipelineError::CheckpointKey(key.to_string()));
        }

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| PipelineError::io(dir, e))?;
        tmp.write_all(key.as_bytes())
            .and_then(|_| tmp.as_file().sync_data())
            .map_err(|e| PipelineError::io(tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| PipelineError::io(&self.path, e.error))?;
        Ok(())
    }
}

/// Whether `key` survives a save/load round trip: not blank, single line.
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty() && !key.contains(['\r', '\n'])
}

fn parse_key(raw: &str) -> Option<String> {
    let key = raw
        .strip_suffix("\r\n")
        .or_else(|| raw.strip_suffix('\n'))
        .unwrap_or(raw);
    is_valid_key(key).then(|| key.to_string())
}
