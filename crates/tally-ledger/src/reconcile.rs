//! Checking cached balances against the transaction log.

use rusqlite::Connection;
use serde::Serialize;
use tally_db::queries::{balances, transactions};
use tally_types::UserId;

use crate::{LedgerError, Result};

/// Cached balance versus log sum for one user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub user_id: UserId,
    pub cached: i64,
    pub ledger_sum: i64,
    pub transaction_count: u64,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.cached == self.ledger_sum
    }
}

/// Compare one user's cached points with the sum of their log.
pub fn reconcile(conn: &Connection, user_id: &str) -> Result<Reconciliation> {
    let cached = balances::points(conn, user_id)?
        .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))?;
    let (ledger_sum, transaction_count) = transactions::sum_for_user(conn, user_id)?;

    let report = Reconciliation {
        user_id: user_id.to_string(),
        cached,
        ledger_sum,
        transaction_count,
    };
    if !report.is_consistent() {
        tracing::error!(user_id, cached, ledger_sum, "ledger mismatch");
    }
    Ok(report)
}

/// Every user whose cached points differ from their log sum.
///
/// Empty in a healthy store.
pub fn reconcile_all(conn: &Connection) -> Result<Vec<Reconciliation>> {
    let mut out = Vec::new();
    for (user_id, cached, ledger_sum) in transactions::mismatches(conn)? {
        let (_, transaction_count) = transactions::sum_for_user(conn, &user_id)?;
        tracing::error!(user_id = %user_id, cached, ledger_sum, "ledger mismatch");
        out.push(Reconciliation {
            user_id,
            cached,
            ledger_sum,
            transaction_count,
        });
    }
    Ok(out)
}

/// Walk a user's log oldest first and check that each entry starts where
/// the previous one ended.
///
/// Returns the id of the first entry that breaks the chain.
pub fn verify_chain(conn: &Connection, user_id: &str) -> Result<Option<i64>> {
    let mut log = transactions::list_for_user(conn, user_id, u32::MAX, None)?;
    log.reverse();

    let mut expected = 0i64;
    for entry in &log {
        if entry.balance_before != expected {
            tracing::error!(
                user_id,
                transaction_id = entry.id,
                expected,
                found = entry.balance_before,
                "ledger chain broken"
            );
            return Ok(Some(entry.id));
        }
        expected = entry.balance_after;
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{apply_transaction, open_account, TransactionRequest};
    use tally_types::TransactionType;

    fn credit(conn: &mut Connection, user_id: &str, amount: i64, now: u64) {
        apply_transaction(
            conn,
            &TransactionRequest {
                user_id,
                tx_type: if amount > 0 {
                    TransactionType::Bonus
                } else {
                    TransactionType::Usage
                },
                amount,
                description: "test",
                related_id: None,
            },
            now,
        )
        .expect("apply");
    }

    #[test]
    fn test_consistent_after_mixed_activity() {
        let mut conn = tally_db::open_memory().expect("open");
        open_account(&mut conn, "u1", 0, 0, 0).expect("account");
        credit(&mut conn, "u1", 100, 1);
        credit(&mut conn, "u1", -40, 2);
        credit(&mut conn, "u1", 15, 3);

        let report = reconcile(&conn, "u1").expect("reconcile");
        assert!(report.is_consistent());
        assert_eq!(report.cached, 75);
        assert_eq!(report.transaction_count, 3);
        assert_eq!(verify_chain(&conn, "u1").expect("chain"), None);
        assert!(reconcile_all(&conn).expect("all").is_empty());
    }

    #[test]
    fn test_detects_tampered_cache() {
        let mut conn = tally_db::open_memory().expect("open");
        open_account(&mut conn, "u1", 0, 0, 0).expect("account");
        credit(&mut conn, "u1", 10, 1);
        conn.execute("UPDATE balances SET points = 99 WHERE user_id = 'u1'", [])
            .expect("tamper");

        let report = reconcile(&conn, "u1").expect("reconcile");
        assert!(!report.is_consistent());

        let all = reconcile_all(&conn).expect("all");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].cached, 99);
        assert_eq!(all[0].ledger_sum, 10);
    }

    #[test]
    fn test_fresh_account_consistent() {
        let mut conn = tally_db::open_memory().expect("open");
        open_account(&mut conn, "u1", 0, 0, 0).expect("account");
        let report = reconcile(&conn, "u1").expect("reconcile");
        assert_eq!(report.transaction_count, 0);
        assert!(report.is_consistent());
    }

    #[test]
    fn test_unknown_user() {
        let conn = tally_db::open_memory().expect("open");
        assert!(matches!(
            reconcile(&conn, "nobody"),
            Err(LedgerError::UserNotFound(_))
        ));
    }
}
