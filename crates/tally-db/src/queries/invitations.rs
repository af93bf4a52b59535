//! Invitation codes and the inviter → invitee relation.

use rusqlite::{Connection, OptionalExtension, Row};
use tally_types::rewards::{Invitation, InvitationCode, InvitationStatus};
use tally_types::{TriggerKind, UserId};

use crate::{parse_label, Result};

const CODE_COLUMNS: &str = "id, inviter_id, code, total_invitations, successful_invitations,
                            is_active, expires_at, created_at, updated_at";

const INVITATION_COLUMNS: &str = "id, invitation_code_id, invited_user_id, status, ip_address,
                                  user_agent, created_at, completed_at";

fn code_from_row(row: &Row<'_>) -> rusqlite::Result<InvitationCode> {
    Ok(InvitationCode {
        id: row.get(0)?,
        inviter_id: row.get(1)?,
        code: row.get(2)?,
        total_invitations: row.get(3)?,
        successful_invitations: row.get(4)?,
        is_active: row.get(5)?,
        expires_at: row.get::<_, Option<i64>>(6)?.map(|v| v as u64),
        created_at: row.get::<_, i64>(7)? as u64,
        updated_at: row.get::<_, i64>(8)? as u64,
    })
}

fn invitation_from_row(row: &Row<'_>) -> rusqlite::Result<Invitation> {
    Ok(Invitation {
        id: row.get(0)?,
        invitation_code_id: row.get(1)?,
        invited_user_id: row.get(2)?,
        status: parse_label(3, row.get(3)?)?,
        ip_address: row.get(4)?,
        user_agent: row.get(5)?,
        created_at: row.get::<_, i64>(6)? as u64,
        completed_at: row.get::<_, Option<i64>>(7)?.map(|v| v as u64),
    })
}

// ------------------------------------------------------------
// Codes
// ------------------------------------------------------------

/// Insert a new active code. Fails with a constraint error if the code
/// string is taken or the inviter already has an active code.
pub fn insert_code(
    conn: &Connection,
    inviter_id: &str,
    code: &str,
    expires_at: Option<u64>,
    now: u64,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO invitation_codes (inviter_id, code, is_active, expires_at, created_at, updated_at)
         VALUES (?1, ?2, 1, ?3, ?4, ?4)",
        rusqlite::params![inviter_id, code, expires_at.map(|v| v as i64), now as i64],
    )?;
    Ok(conn.last_insert_rowid())
}

/// The inviter's active code, if any.
pub fn active_code_for(conn: &Connection, inviter_id: &str) -> Result<Option<InvitationCode>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {CODE_COLUMNS} FROM invitation_codes
                 WHERE inviter_id = ?1 AND is_active = 1"
            ),
            [inviter_id],
            code_from_row,
        )
        .optional()?)
}

/// Look up a code by its shareable string.
pub fn code_by_value(conn: &Connection, code: &str) -> Result<Option<InvitationCode>> {
    Ok(conn
        .query_row(
            &format!("SELECT {CODE_COLUMNS} FROM invitation_codes WHERE code = ?1"),
            [code],
            code_from_row,
        )
        .optional()?)
}

/// Look up a code by row id.
pub fn code_by_id(conn: &Connection, id: i64) -> Result<Option<InvitationCode>> {
    Ok(conn
        .query_row(
            &format!("SELECT {CODE_COLUMNS} FROM invitation_codes WHERE id = ?1"),
            [id],
            code_from_row,
        )
        .optional()?)
}

/// All codes owned by an inviter, newest first.
pub fn codes_for_inviter(conn: &Connection, inviter_id: &str) -> Result<Vec<InvitationCode>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CODE_COLUMNS} FROM invitation_codes WHERE inviter_id = ?1 ORDER BY id DESC"
    ))?;
    let rows = stmt
        .query_map([inviter_id], code_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Codes with at least one successful invitation.
pub fn codes_with_successes(conn: &Connection) -> Result<Vec<InvitationCode>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CODE_COLUMNS} FROM invitation_codes
         WHERE successful_invitations > 0 ORDER BY id"
    ))?;
    let rows = stmt
        .query_map([], code_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Deactivate every active code of an inviter. Returns the number changed.
pub fn deactivate_codes(conn: &Connection, inviter_id: &str, now: u64) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE invitation_codes SET is_active = 0, updated_at = ?2
         WHERE inviter_id = ?1 AND is_active = 1",
        rusqlite::params![inviter_id, now as i64],
    )?)
}

/// Count one completed signup against a code.
pub fn increment_counts(conn: &Connection, code_id: i64, now: u64) -> Result<u32> {
    conn.execute(
        "UPDATE invitation_codes
         SET total_invitations = total_invitations + 1,
             successful_invitations = successful_invitations + 1,
             updated_at = ?2
         WHERE id = ?1",
        rusqlite::params![code_id, now as i64],
    )?;
    Ok(conn.query_row(
        "SELECT successful_invitations FROM invitation_codes WHERE id = ?1",
        [code_id],
        |row| row.get(0),
    )?)
}

/// Overwrite the successful count after a recount.
pub fn set_successful(conn: &Connection, code_id: i64, count: u32, now: u64) -> Result<()> {
    conn.execute(
        "UPDATE invitation_codes
         SET successful_invitations = ?2,
             total_invitations = MAX(total_invitations, ?2),
             updated_at = ?3
         WHERE id = ?1",
        rusqlite::params![code_id, count, now as i64],
    )?;
    Ok(())
}

/// Completed invitations across every code of an inviter.
pub fn successful_for_inviter(conn: &Connection, inviter_id: &str) -> Result<u32> {
    Ok(conn.query_row(
        "SELECT COALESCE(SUM(successful_invitations), 0)
         FROM invitation_codes WHERE inviter_id = ?1",
        [inviter_id],
        |row| row.get(0),
    )?)
}

// ------------------------------------------------------------
// Invitations
// ------------------------------------------------------------

/// Link an invitee to a code. Returns `None` if the invitee is already
/// linked to any code (first writer wins).
pub fn insert_invitation(
    conn: &Connection,
    code_id: i64,
    invited_user_id: &str,
    status: InvitationStatus,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
    now: u64,
) -> Result<Option<i64>> {
    let completed_at = (status == InvitationStatus::Completed).then_some(now as i64);
    let inserted = conn.execute(
        "INSERT INTO invitations
            (invitation_code_id, invited_user_id, status, ip_address, user_agent,
             created_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(invited_user_id) DO NOTHING",
        rusqlite::params![
            code_id,
            invited_user_id,
            status.as_str(),
            ip_address,
            user_agent,
            now as i64,
            completed_at,
        ],
    )?;
    if inserted == 0 {
        return Ok(None);
    }
    Ok(Some(conn.last_insert_rowid()))
}

/// The invitation an invitee signed up through, if any.
pub fn invitation_for_user(conn: &Connection, invited_user_id: &str) -> Result<Option<Invitation>> {
    Ok(conn
        .query_row(
            &format!("SELECT {INVITATION_COLUMNS} FROM invitations WHERE invited_user_id = ?1"),
            [invited_user_id],
            invitation_from_row,
        )
        .optional()?)
}

/// Invitations recorded under a code, oldest first.
pub fn invitations_for_code(conn: &Connection, code_id: i64) -> Result<Vec<Invitation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {INVITATION_COLUMNS} FROM invitations WHERE invitation_code_id = ?1 ORDER BY id"
    ))?;
    let rows = stmt
        .query_map([code_id], invitation_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Completed invitations under a code.
pub fn count_completed(conn: &Connection, code_id: i64) -> Result<u32> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM invitations WHERE invitation_code_id = ?1 AND status = ?2",
        rusqlite::params![code_id, InvitationStatus::Completed.as_str()],
        |row| row.get(0),
    )?)
}

/// Invitations already recorded under a code from one IP address.
pub fn count_from_ip(conn: &Connection, code_id: i64, ip_address: &str) -> Result<u32> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM invitations WHERE invitation_code_id = ?1 AND ip_address = ?2",
        rusqlite::params![code_id, ip_address],
        |row| row.get(0),
    )?)
}

/// Completed invitations whose base bonus has no claim yet, with the
/// inviter each one belongs to.
pub fn completed_without_claim(conn: &Connection) -> Result<Vec<(Invitation, UserId)>> {
    let mut stmt = conn.prepare(
        "SELECT i.id, i.invitation_code_id, i.invited_user_id, i.status, i.ip_address,
                i.user_agent, i.created_at, i.completed_at, c.inviter_id
         FROM invitations i
         JOIN invitation_codes c ON c.id = i.invitation_code_id
         LEFT JOIN reward_claims r
                ON r.trigger_kind = ?1 AND r.trigger_key = CAST(i.id AS TEXT)
         WHERE i.status = ?2 AND r.id IS NULL
         ORDER BY i.id",
    )?;
    let rows = stmt
        .query_map(
            rusqlite::params![
                TriggerKind::Invitation.as_str(),
                InvitationStatus::Completed.as_str()
            ],
            |row| Ok((invitation_from_row(row)?, row.get(8)?)),
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
