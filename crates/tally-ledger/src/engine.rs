//! Accounts and single-delta transactions.
//!
//! Functions come in pairs: `foo` opens and commits its own immediate
//! transaction, `foo_in` runs inside a transaction the caller already holds
//! so that it can be composed with other writes into one atomic unit.

use rusqlite::Connection;
use serde::Serialize;
use tally_db::queries::{balances, transactions};
use tally_db::queries::transactions::NewTransaction;
use tally_types::events::PointsChanged;
use tally_types::{Balance, Transaction, TransactionId, TransactionType, UserId};

use crate::{LedgerError, Result};

/// A single point delta to apply to one user.
#[derive(Clone, Debug)]
pub struct TransactionRequest<'a> {
    pub user_id: &'a str,
    pub tx_type: TransactionType,
    /// Signed, nonzero.
    pub amount: i64,
    pub description: &'a str,
    pub related_id: Option<&'a str>,
}

/// The committed result of a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Applied {
    pub transaction_id: TransactionId,
    pub user_id: UserId,
    pub tx_type: TransactionType,
    pub amount: i64,
    pub balance_before: i64,
    pub new_balance: i64,
}

impl Applied {
    /// The point-change notification for observers.
    pub fn event(&self) -> PointsChanged {
        PointsChanged {
            user_id: self.user_id.clone(),
            delta: self.amount,
            new_balance: self.new_balance,
            reason: self.tx_type,
            transaction_id: self.transaction_id,
        }
    }
}

/// Create a user's balance row if missing. Returns `true` if created.
///
/// New accounts start at zero points; any opening grant must be a
/// transaction so the log sums to the cached balance from the first row.
pub fn open_account(
    conn: &mut Connection,
    user_id: &str,
    daily_allowance: i64,
    today: u64,
    now: u64,
) -> Result<bool> {
    let tx = tally_db::immediate(conn)?;
    let created = open_account_in(&tx, user_id, daily_allowance, today, now)?;
    tx.commit()?;
    Ok(created)
}

/// [`open_account`] inside the caller's transaction.
pub fn open_account_in(
    conn: &Connection,
    user_id: &str,
    daily_allowance: i64,
    today: u64,
    now: u64,
) -> Result<bool> {
    let created = balances::insert_if_absent(conn, user_id, daily_allowance, today, now)?;
    if created {
        tracing::info!(user_id, "account opened");
    }
    Ok(created)
}

/// Apply one delta and append its log entry as a single atomic unit.
///
/// # Errors
///
/// - [`LedgerError::ZeroAmount`] if `amount == 0`
/// - [`LedgerError::UserNotFound`] if the user has no account
/// - [`LedgerError::InsufficientBalance`] if the result would be negative;
///   nothing is written
/// - [`LedgerError::StorageUnavailable`] if the store is locked; retry
pub fn apply_transaction(
    conn: &mut Connection,
    req: &TransactionRequest<'_>,
    now: u64,
) -> Result<Applied> {
    let tx = tally_db::immediate(conn)?;
    let applied = apply_in(&tx, req, now)?;
    tx.commit()?;
    Ok(applied)
}

/// [`apply_transaction`] inside the caller's transaction.
///
/// On error nothing has been written, but the caller still owns the
/// transaction and decides whether to roll back.
pub fn apply_in(conn: &Connection, req: &TransactionRequest<'_>, now: u64) -> Result<Applied> {
    if req.amount == 0 {
        return Err(LedgerError::ZeroAmount);
    }

    let before = balances::points(conn, req.user_id)?
        .ok_or_else(|| LedgerError::UserNotFound(req.user_id.to_string()))?;
    let after = before.checked_add(req.amount).ok_or(LedgerError::Overflow)?;

    if after < 0 || !balances::add_points_guarded(conn, req.user_id, req.amount, now)? {
        tracing::debug!(
            user_id = req.user_id,
            amount = req.amount,
            available = before,
            "debit rejected"
        );
        return Err(LedgerError::InsufficientBalance {
            required: -req.amount,
            available: before,
        });
    }

    let transaction_id = transactions::append(
        conn,
        &NewTransaction {
            user_id: req.user_id,
            tx_type: req.tx_type,
            amount: req.amount,
            description: req.description,
            balance_before: before,
            related_id: req.related_id,
            created_at: now,
        },
    )?;

    tracing::info!(
        user_id = req.user_id,
        tx_type = %req.tx_type,
        amount = req.amount,
        balance = after,
        transaction_id,
        "points applied"
    );

    Ok(Applied {
        transaction_id,
        user_id: req.user_id.to_string(),
        tx_type: req.tx_type,
        amount: req.amount,
        balance_before: before,
        new_balance: after,
    })
}

/// Return points after a failed downstream call.
pub fn refund(
    conn: &mut Connection,
    user_id: &str,
    amount: i64,
    description: &str,
    related_id: Option<&str>,
    now: u64,
) -> Result<Applied> {
    apply_transaction(
        conn,
        &TransactionRequest {
            user_id,
            tx_type: TransactionType::Refund,
            amount: amount.checked_abs().ok_or(LedgerError::Overflow)?,
            description,
            related_id,
        },
        now,
    )
}

/// Current balance row of a user.
pub fn balance(conn: &Connection, user_id: &str) -> Result<Balance> {
    balances::find(conn, user_id)?.ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))
}

/// A user's transactions, newest first.
pub fn history(
    conn: &Connection,
    user_id: &str,
    limit: u32,
    before: Option<TransactionId>,
) -> Result<Vec<Transaction>> {
    Ok(transactions::list_for_user(conn, user_id, limit, before)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        let mut conn = tally_db::open_memory().expect("open test db");
        open_account(&mut conn, "u1", 0, 0, 0).expect("account");
        conn
    }

    fn req(amount: i64, tx_type: TransactionType) -> TransactionRequest<'static> {
        TransactionRequest {
            user_id: "u1",
            tx_type,
            amount,
            description: "test",
            related_id: None,
        }
    }

    #[test]
    fn test_credit_then_debit() {
        let mut conn = test_db();
        let credit = apply_transaction(&mut conn, &req(100, TransactionType::Bonus), 10)
            .expect("credit");
        assert_eq!(credit.balance_before, 0);
        assert_eq!(credit.new_balance, 100);

        let debit = apply_transaction(&mut conn, &req(-30, TransactionType::Usage), 11)
            .expect("debit");
        assert_eq!(debit.new_balance, 70);
        assert_eq!(balance(&conn, "u1").expect("balance").points, 70);

        let log = history(&conn, "u1", 10, None).expect("history");
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].id, debit.transaction_id);
        assert_eq!(log[0].balance_before, 100);
        assert_eq!(log[0].balance_after, 70);
    }

    #[test]
    fn test_overdraft_writes_nothing() {
        let mut conn = test_db();
        apply_transaction(&mut conn, &req(10, TransactionType::Bonus), 1).expect("credit");

        let err = apply_transaction(&mut conn, &req(-11, TransactionType::Usage), 2)
            .expect_err("overdraft");
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance {
                required: 11,
                available: 10
            }
        ));
        assert_eq!(balance(&conn, "u1").expect("balance").points, 10);
        assert_eq!(history(&conn, "u1", 10, None).expect("history").len(), 1);
    }

    #[test]
    fn test_debit_to_exactly_zero() {
        let mut conn = test_db();
        apply_transaction(&mut conn, &req(10, TransactionType::Bonus), 1).expect("credit");
        let applied = apply_transaction(&mut conn, &req(-10, TransactionType::Usage), 2)
            .expect("debit all");
        assert_eq!(applied.new_balance, 0);
    }

    #[test]
    fn test_zero_amount_rejected() {
        let mut conn = test_db();
        let err = apply_transaction(&mut conn, &req(0, TransactionType::Admin), 1)
            .expect_err("zero");
        assert!(matches!(err, LedgerError::ZeroAmount));
    }

    #[test]
    fn test_unknown_user() {
        let mut conn = test_db();
        let mut request = req(5, TransactionType::Bonus);
        request.user_id = "ghost";
        let err = apply_transaction(&mut conn, &request, 1).expect_err("ghost");
        assert!(matches!(err, LedgerError::UserNotFound(ref u) if u == "ghost"));
        assert!(matches!(balance(&conn, "ghost"), Err(LedgerError::UserNotFound(_))));
    }

    #[test]
    fn test_refund_is_positive() {
        let mut conn = test_db();
        apply_transaction(&mut conn, &req(50, TransactionType::Bonus), 1).expect("credit");
        apply_transaction(&mut conn, &req(-20, TransactionType::Usage), 2).expect("usage");
        let refunded = refund(&mut conn, "u1", -20, "generation failed", Some("job-9"), 3)
            .expect("refund");
        assert_eq!(refunded.amount, 20);
        assert_eq!(refunded.new_balance, 50);

        let last = &history(&conn, "u1", 1, None).expect("history")[0];
        assert_eq!(last.tx_type, TransactionType::Refund);
        assert_eq!(last.related_id.as_deref(), Some("job-9"));
    }

    #[test]
    fn test_refund_of_min_amount_overflows() {
        let mut conn = test_db();
        let err = refund(&mut conn, "u1", i64::MIN, "bogus", None, 1).expect_err("overflow");
        assert!(matches!(err, LedgerError::Overflow));
        assert!(history(&conn, "u1", 10, None).expect("history").is_empty());
    }

    #[test]
    fn test_open_account_idempotent() {
        let mut conn = test_db();
        assert!(!open_account(&mut conn, "u1", 0, 5, 5).expect("reopen"));
        assert!(open_account(&mut conn, "u2", 0, 5, 5).expect("new"));
    }

    #[test]
    fn test_event_matches_applied() {
        let mut conn = test_db();
        let applied = apply_transaction(&mut conn, &req(7, TransactionType::Admin), 1)
            .expect("credit");
        let event = applied.event();
        assert_eq!(event.delta, 7);
        assert_eq!(event.new_balance, 7);
        assert_eq!(event.reason, TransactionType::Admin);
        assert_eq!(event.transaction_id, applied.transaction_id);
    }

    #[test]
    fn test_concurrent_debits_never_overdraw() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tally.db");
        {
            let mut conn = tally_db::open(&path).expect("open");
            open_account(&mut conn, "u1", 0, 0, 0).expect("account");
            apply_transaction(&mut conn, &req(50, TransactionType::Bonus), 1).expect("seed");
        }

        let workers: Vec<_> = (0..12)
            .map(|i| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let mut conn = tally_db::open(&path).expect("open worker");
                    apply_transaction(&mut conn, &req(-10, TransactionType::Usage), 10 + i)
                })
            })
            .collect();

        let mut ok = 0;
        let mut insufficient = 0;
        for worker in workers {
            match worker.join().expect("join") {
                Ok(_) => ok += 1,
                Err(LedgerError::InsufficientBalance { .. }) => insufficient += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, 5);
        assert_eq!(insufficient, 7);

        let conn = tally_db::open(&path).expect("open");
        assert_eq!(balance(&conn, "u1").expect("balance").points, 0);
        assert!(crate::reconcile::reconcile_all(&conn).expect("reconcile").is_empty());
    }
}
