//! # tally-db
//!
//! Ledger store for the points core. Manages the single SQLite database at
//! `$TALLY_DATA_DIR/tally.db`.
//!
//! ## Schema
//!
//! - WAL mode mandatory
//! - Foreign keys enforced
//! - All timestamps are Unix epoch seconds; calendar days are day indices
//! - Schema version stored in `PRAGMA user_version`
//! - `transactions` is append-only, enforced by triggers
//!
//! Every mutating caller opens a `BEGIN IMMEDIATE` transaction with
//! [`immediate`] so that the read of a balance and the write that depends
//! on it can never interleave with another writer.

pub mod migrations;
pub mod pool;
pub mod queries;
pub mod schema;

use std::path::Path;
use std::str::FromStr;

use rusqlite::{Connection, ErrorCode, TransactionBehavior};

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Database error types.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),

    /// The database is locked by another writer. Safe to retry.
    #[error("database busy: {0}")]
    Busy(String),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl DbError {
    /// True when the operation may succeed if retried unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, DbError::Busy(_))
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
                DbError::Busy(e.to_string())
            }
            Some(ErrorCode::ConstraintViolation) => DbError::Constraint(e.to_string()),
            _ => DbError::Sqlite(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Open or create the ledger database at the given path.
///
/// Configures WAL mode, foreign keys, and runs any pending migrations.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Open an in-memory database (for testing).
pub fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Configure SQLite pragmas.
fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -8000;",
    )?;
    Ok(())
}

/// Begin a write transaction that takes the database write lock up front.
///
/// Deferred transactions upgrade their lock on first write and can fail
/// with `SQLITE_BUSY` half way through; immediate ones either start holding
/// the lock or fail before reading anything.
pub fn immediate(conn: &mut Connection) -> Result<rusqlite::Transaction<'_>> {
    Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
}

/// True if the error is a UNIQUE or PRIMARY KEY violation.
pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

/// Parse a TEXT column holding an enum label.
pub(crate) fn parse_label<T>(idx: usize, label: String) -> rusqlite::Result<T>
where
    T: FromStr<Err = tally_types::ParseLabelError>,
{
    label.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_memory() {
        let conn = open_memory().expect("open in-memory db");
        let version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .expect("get user_version");
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_wal_mode() {
        let conn = open_memory().expect("open");
        let mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .expect("get journal_mode");
        // In-memory databases use "memory" mode, not WAL
        assert!(mode == "wal" || mode == "memory");
    }

    #[test]
    fn test_wal_mode_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = open(&dir.path().join("tally.db")).expect("open");
        let mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .expect("get journal_mode");
        assert_eq!(mode, "wal");
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let conn = open_memory().expect("open");
        let fk: i32 = conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .expect("get foreign_keys");
        assert_eq!(fk, 1);
    }

    #[test]
    fn test_unique_violation_detected() {
        let conn = open_memory().expect("open");
        conn.execute(
            "INSERT INTO milestones (threshold, bonus_points, is_active) VALUES (5, 10, 1)",
            [],
        )
        .expect("insert");
        let err = conn
            .execute(
                "INSERT INTO milestones (threshold, bonus_points, is_active) VALUES (5, 20, 1)",
                [],
            )
            .expect_err("should fail");
        assert!(is_unique_violation(&err));
        assert!(matches!(DbError::from(err), DbError::Constraint(_)));
    }

    #[test]
    fn test_busy_is_transient() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tally.db");
        let mut holder = open(&path).expect("open holder");
        let mut other = open(&path).expect("open other");
        other
            .busy_timeout(std::time::Duration::from_millis(0))
            .expect("timeout");

        let _tx = immediate(&mut holder).expect("lock");
        match immediate(&mut other) {
            Ok(_) => panic!("second writer should be busy"),
            Err(err) => assert!(err.is_transient(), "got {err:?}"),
        };
    }
}
