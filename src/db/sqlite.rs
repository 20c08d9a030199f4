use std::path::Path;

use rusqlite::{Connection, OpenFlags};

use super::DatabaseError;

/// Open the moderation vote database read-only.
///
/// The store belongs to another system; this job never writes to it.
pub fn open_moderation_store(path: &Path) -> Result<Connection, DatabaseError> {
    if !path.exists() {
        return Err(DatabaseError::NotFound(path.display().to_string()));
    }
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    tracing::debug!(path = %path.display(), "Opened moderation store");
    Ok(conn)
}

/// Check that the `titleVotes` table exists with the columns the lookup reads.
pub fn verify_schema(conn: &Connection) -> Result<(), DatabaseError> {
    conn.prepare("SELECT UUID, locked, shadowHidden, removed, votes, downvotes FROM titleVotes LIMIT 0")?;
    Ok(())
}
