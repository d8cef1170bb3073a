//! Database layer for tariff-match.

mod schema;
mod catalog;
mod overrides;
mod embeddings;
mod retail;

pub use schema::*;
pub use embeddings::EmbeddingRecord;

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// SQLite connection holding the catalog, overrides, embeddings, stock and sales.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open the database file at `path`, creating tables on first use.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        let db = Self::with_schema(conn)?;
        debug!(path = %path.as_ref().display(), journal_mode = %mode, "database opened");
        Ok(db)
    }

    /// Fresh in-memory database, used by tests and throwaway sessions.
    pub fn open_in_memory() -> DbResult<Self> {
        Self::with_schema(Connection::open_in_memory()?)
    }

    fn with_schema(conn: Connection) -> DbResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Underlying connection, for ad-hoc queries.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}
