//! Per-title moderation state from the community vote database.
//!
//! Every lookup is a fresh query; the store may change underneath a long run.

use std::path::Path;

use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use super::sqlite::{open_moderation_store, verify_schema};
use super::DatabaseError;

/// Moderation snapshot for one title submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModerationStatus {
    pub locked: bool,
    pub shadow_hidden: bool,
    pub removed: bool,
    pub votes: i64,
    pub downvotes: i64,
}

impl ModerationStatus {
    /// Votes minus downvotes.
    pub fn net_score(&self) -> i64 {
        self.votes - self.downvotes
    }
}

/// Read-only access to moderation state keyed by submission UUID.
pub trait ModerationLookup {
    /// `Ok(None)` means the key is not in the store, which is an expected outcome.
    fn lookup(&self, key: &str) -> Result<Option<ModerationStatus>, DatabaseError>;
}

/// SQLite-backed lookup over the `titleVotes` table.
pub struct SqliteModerationStore {
    conn: Connection,
}

impl SqliteModerationStore {
    pub fn new(conn: Connection) -> Result<Self, DatabaseError> {
        verify_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Open the database file read-only and check its schema.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Self::new(open_moderation_store(path)?)
    }
}

impl ModerationLookup for SqliteModerationStore {
    fn lookup(&self, key: &str) -> Result<Option<ModerationStatus>, DatabaseError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT locked, shadowHidden, removed, votes, downvotes
             FROM titleVotes WHERE UUID = ?1",
        )?;

        let row = stmt
            .query_row([key], |row| {
                Ok((
                    row.get::<_, Value>(0)?,
                    row.get::<_, Value>(1)?,
                    row.get::<_, Value>(2)?,
                    row.get::<_, Value>(3)?,
                    row.get::<_, Value>(4)?,
                ))
            })
            .optional()?;

        let Some((locked, shadow_hidden, removed, votes, downvotes)) = row else {
            return Ok(None);
        };

        Ok(Some(ModerationStatus {
            locked: coerce_int("locked", locked)? != 0,
            shadow_hidden: coerce_int("shadowHidden", shadow_hidden)? != 0,
            removed: coerce_int("removed", removed)? != 0,
            votes: coerce_int("votes", votes)?,
            downvotes: coerce_int("downvotes", downvotes)?,
        }))
    }
}

/// The vote export stores numbers as TEXT; native INTEGER columns work too.
/// NULL reads as 0.
fn coerce_int(column: &'static str, value: Value) -> Result<i64, DatabaseError> {
    match value {
        Value::Null => Ok(0),
        Value::Integer(i) => Ok(i),
        Value::Real(f) if f.fract() == 0.0 => Ok(f as i64),
        Value::Text(ref s) => s.trim().parse::<i64>().map_err(|_| DatabaseError::InvalidValue {
            column,
            value: s.clone(),
        }),
        other => Err(DatabaseError::InvalidValue {
            column,
            value: format!("{other:?}"),
        }),
    }
}
