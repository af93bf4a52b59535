//! Database migration system.
//!
//! Schema version stored in `PRAGMA user_version`. Migrations are
//! forward-only; a database written by a newer binary is refused.

use rusqlite::Connection;

use crate::{schema, DbError, Result, SCHEMA_VERSION};

/// Run all pending migrations.
pub fn run(conn: &Connection) -> Result<()> {
    let current_version: u32 =
        conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if current_version == 0 {
        // Fresh database: apply initial schema
        tracing::info!("Initializing ledger schema v{SCHEMA_VERSION}");
        conn.execute_batch(schema::SCHEMA_V1)?;

        insert_default_settings(conn)?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        for version in (current_version + 1)..=SCHEMA_VERSION {
            tracing::info!("Running migration to v{version}");
            run_migration(conn, version)?;
            conn.pragma_update(None, "user_version", version)?;
        }
    } else if current_version > SCHEMA_VERSION {
        return Err(DbError::Migration(format!(
            "Database version {current_version} is newer than supported {SCHEMA_VERSION}"
        )));
    }

    Ok(())
}

/// Insert default settings.
fn insert_default_settings(conn: &Connection) -> Result<()> {
    let defaults = [("last_batch_reset_day", "0"), ("last_reward_reconcile_day", "0")];

    let mut stmt = conn.prepare("INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)")?;

    for (key, value) in &defaults {
        stmt.execute(rusqlite::params![key, value])?;
    }

    Ok(())
}

/// Run a specific migration.
fn run_migration(_conn: &Connection, version: u32) -> Result<()> {
    Err(DbError::Migration(format!(
        "Unknown migration version: {version}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute_batch("PRAGMA foreign_keys = ON;").expect("pragma");
        conn
    }

    #[test]
    fn test_fresh_migration() {
        let conn = fresh();
        run(&conn).expect("migrate");

        let version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .expect("version");
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_idempotent_migration() {
        let conn = fresh();
        run(&conn).expect("first run");
        run(&conn).expect("second run should be no-op");
    }

    #[test]
    fn test_newer_database_refused() {
        let conn = fresh();
        run(&conn).expect("migrate");
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .expect("bump");
        assert!(matches!(run(&conn), Err(DbError::Migration(_))));
    }

    #[test]
    fn test_default_settings() {
        let conn = fresh();
        run(&conn).expect("migrate");

        let day: String = conn
            .query_row(
                "SELECT value FROM settings WHERE key = 'last_batch_reset_day'",
                [],
                |row| row.get(0),
            )
            .expect("query");
        assert_eq!(day, "0");
    }

    #[test]
    fn test_tables_created() {
        let conn = fresh();
        run(&conn).expect("migrate");

        let expected_tables = [
            "balances",
            "transactions",
            "reward_claims",
            "invitation_codes",
            "invitations",
            "milestones",
            "redemption_codes",
            "settings",
            "job_leases",
        ];

        for table in &expected_tables {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap_or_else(|_| panic!("table {table} check"));
            assert_eq!(count, 1, "Table '{table}' should exist");
        }
    }

    #[test]
    fn test_transactions_append_only() {
        let conn = fresh();
        run(&conn).expect("migrate");
        conn.execute(
            "INSERT INTO balances (user_id, points, last_reset_day, created_at, updated_at)
             VALUES ('u1', 5, 0, 0, 0)",
            [],
        )
        .expect("balance");
        conn.execute(
            "INSERT INTO transactions
                (user_id, tx_type, amount, description, balance_before, balance_after, created_at)
             VALUES ('u1', 'bonus', 5, 'seed', 0, 5, 0)",
            [],
        )
        .expect("append");

        assert!(conn
            .execute("UPDATE transactions SET amount = 50", [])
            .is_err());
        assert!(conn.execute("DELETE FROM transactions", []).is_err());
    }

    #[test]
    fn test_transaction_arithmetic_checked() {
        let conn = fresh();
        run(&conn).expect("migrate");
        conn.execute(
            "INSERT INTO balances (user_id, last_reset_day, created_at, updated_at)
             VALUES ('u1', 0, 0, 0)",
            [],
        )
        .expect("balance");
        let result = conn.execute(
            "INSERT INTO transactions
                (user_id, tx_type, amount, description, balance_before, balance_after, created_at)
             VALUES ('u1', 'bonus', 5, 'bad', 0, 6, 0)",
            [],
        );
        assert!(result.is_err());
    }
}
