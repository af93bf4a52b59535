//! Redemption code rows.

use rusqlite::{Connection, OptionalExtension, Row};
use tally_types::redemption::RedemptionCode;

use crate::{parse_label, Result};

const COLUMNS: &str = "code, kind, value, membership_tier, membership_days, is_used, used_by,
                       used_at, expires_at, created_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<RedemptionCode> {
    let tier: Option<String> = row.get(3)?;
    Ok(RedemptionCode {
        code: row.get(0)?,
        kind: parse_label(1, row.get(1)?)?,
        value: row.get(2)?,
        membership_tier: tier.map(|t| parse_label(3, t)).transpose()?,
        membership_days: row.get(4)?,
        is_used: row.get(5)?,
        used_by: row.get(6)?,
        used_at: row.get::<_, Option<i64>>(7)?.map(|v| v as u64),
        expires_at: row.get::<_, Option<i64>>(8)?.map(|v| v as u64),
        created_at: row.get::<_, i64>(9)? as u64,
    })
}

/// Insert an unused code. Fails with a constraint error on a duplicate.
pub fn insert(conn: &Connection, code: &RedemptionCode) -> Result<()> {
    conn.execute(
        "INSERT INTO redemption_codes
            (code, kind, value, membership_tier, membership_days, is_used, expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7)",
        rusqlite::params![
            code.code,
            code.kind.as_str(),
            code.value,
            code.membership_tier.map(|t| t.as_str()),
            code.membership_days,
            code.expires_at.map(|v| v as i64),
            code.created_at as i64,
        ],
    )?;
    Ok(())
}

/// Look up a code.
pub fn find(conn: &Connection, code: &str) -> Result<Option<RedemptionCode>> {
    Ok(conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM redemption_codes WHERE code = ?1"),
            [code],
            from_row,
        )
        .optional()?)
}

/// Flip a code from unused to used. Returns `false` if the code was
/// already used (or does not exist); exactly one caller ever sees `true`.
pub fn mark_used(conn: &Connection, code: &str, user_id: &str, now: u64) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE redemption_codes SET is_used = 1, used_by = ?2, used_at = ?3
         WHERE code = ?1 AND is_used = 0",
        rusqlite::params![code, user_id, now as i64],
    )?;
    Ok(updated == 1)
}

/// Codes redeemed by a user, newest first.
pub fn used_by(conn: &Connection, user_id: &str) -> Result<Vec<RedemptionCode>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM redemption_codes WHERE used_by = ?1 ORDER BY used_at DESC"
    ))?;
    let rows = stmt
        .query_map([user_id], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DbError;
    use tally_types::{MembershipTier, RedemptionKind};

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    fn membership_code(code: &str) -> RedemptionCode {
        RedemptionCode {
            code: code.to_string(),
            kind: RedemptionKind::Membership,
            value: 0,
            membership_tier: Some(MembershipTier::Pro),
            membership_days: Some(30),
            is_used: false,
            used_by: None,
            used_at: None,
            expires_at: Some(5000),
            created_at: 100,
        }
    }

    #[test]
    fn test_insert_and_find() {
        let conn = test_db();
        insert(&conn, &membership_code("PRO-30")).expect("insert");
        let found = find(&conn, "PRO-30").expect("find").expect("present");
        assert_eq!(found, membership_code("PRO-30"));
        assert!(find(&conn, "NOPE").expect("find").is_none());
    }

    #[test]
    fn test_duplicate_code_rejected() {
        let conn = test_db();
        insert(&conn, &membership_code("DUP")).expect("insert");
        assert!(matches!(
            insert(&conn, &membership_code("DUP")),
            Err(DbError::Constraint(_))
        ));
    }

    #[test]
    fn test_mark_used_once() {
        let conn = test_db();
        insert(&conn, &membership_code("ONCE")).expect("insert");
        assert!(mark_used(&conn, "ONCE", "u1", 200).expect("first"));
        assert!(!mark_used(&conn, "ONCE", "u2", 201).expect("second"));
        assert!(!mark_used(&conn, "MISSING", "u2", 201).expect("missing"));

        let used = find(&conn, "ONCE").expect("find").expect("present");
        assert!(used.is_used);
        assert_eq!(used.used_by.as_deref(), Some("u1"));
        assert_eq!(used_by(&conn, "u1").expect("list").len(), 1);
    }
}
