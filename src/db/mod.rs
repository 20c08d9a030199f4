pub mod moderation;
pub mod sqlite;

pub use moderation::*;
pub use sqlite::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Moderation store not found at {0}")]
    NotFound(String),

    #[error("Invalid value in column {column}: {value}")]
    InvalidValue { column: &'static str, value: String },
}
