//! Append-only transaction log.

use rusqlite::{Connection, OptionalExtension, Row};
use tally_types::{Transaction, TransactionId, TransactionType, UserId};

use crate::{parse_label, Result};

const COLUMNS: &str = "id, user_id, tx_type, amount, description, balance_before,
                       balance_after, created_at, related_id";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    Ok(Transaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        tx_type: parse_label(2, row.get(2)?)?,
        amount: row.get(3)?,
        description: row.get(4)?,
        balance_before: row.get(5)?,
        balance_after: row.get(6)?,
        created_at: row.get::<_, i64>(7)? as u64,
        related_id: row.get(8)?,
    })
}

/// A transaction about to be appended.
#[derive(Debug)]
pub struct NewTransaction<'a> {
    pub user_id: &'a str,
    pub tx_type: TransactionType,
    pub amount: i64,
    pub description: &'a str,
    pub balance_before: i64,
    pub related_id: Option<&'a str>,
    pub created_at: u64,
}

/// Append a transaction and return its id.
pub fn append(conn: &Connection, tx: &NewTransaction<'_>) -> Result<TransactionId> {
    conn.execute(
        "INSERT INTO transactions
            (user_id, tx_type, amount, description, balance_before, balance_after,
             created_at, related_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            tx.user_id,
            tx.tx_type.as_str(),
            tx.amount,
            tx.description,
            tx.balance_before,
            tx.balance_before + tx.amount,
            tx.created_at as i64,
            tx.related_id,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Fetch a single transaction.
pub fn get(conn: &Connection, id: TransactionId) -> Result<Option<Transaction>> {
    Ok(conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM transactions WHERE id = ?1"),
            [id],
            from_row,
        )
        .optional()?)
}

/// List a user's transactions, newest first.
///
/// `before` pages backwards from a transaction id.
pub fn list_for_user(
    conn: &Connection,
    user_id: &str,
    limit: u32,
    before: Option<TransactionId>,
) -> Result<Vec<Transaction>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM transactions
         WHERE user_id = ?1 AND (?2 IS NULL OR id < ?2)
         ORDER BY id DESC LIMIT ?3"
    ))?;

    let rows = stmt
        .query_map(rusqlite::params![user_id, before, limit], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Sum and count of a user's transaction amounts.
pub fn sum_for_user(conn: &Connection, user_id: &str) -> Result<(i64, u64)> {
    let (sum, count): (i64, i64) = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0), COUNT(*) FROM transactions WHERE user_id = ?1",
        [user_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok((sum, count as u64))
}

/// Users whose cached points differ from the sum of their log.
///
/// Returns `(user_id, cached_points, ledger_sum)`.
pub fn mismatches(conn: &Connection) -> Result<Vec<(UserId, i64, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT b.user_id, b.points, COALESCE(SUM(t.amount), 0) AS ledger_sum
         FROM balances b LEFT JOIN transactions t ON t.user_id = b.user_id
         GROUP BY b.user_id
         HAVING b.points != ledger_sum
         ORDER BY b.user_id",
    )?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Count transactions of one type for a user.
pub fn count_of_type(conn: &Connection, user_id: &str, tx_type: TransactionType) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM transactions WHERE user_id = ?1 AND tx_type = ?2",
        rusqlite::params![user_id, tx_type.as_str()],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}
