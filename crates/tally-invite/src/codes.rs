//! Invitation code lifecycle.

use rusqlite::Connection;
use tally_db::queries::invitations;
use tally_db::DbError;
use tally_types::codes::generate_code;
use tally_types::rewards::InvitationCode;

use crate::{InviteError, InvitePolicy, Result};

const MAX_CODE_ATTEMPTS: usize = 8;

/// Return the inviter's active code, creating one if they have none.
///
/// An expired active code is retired and replaced.
pub fn create_code(
    conn: &mut Connection,
    policy: &InvitePolicy,
    inviter_id: &str,
    now: u64,
) -> Result<InvitationCode> {
    let tx = tally_db::immediate(conn)?;

    if let Some(existing) = invitations::active_code_for(&tx, inviter_id)? {
        if !existing.is_expired(now) {
            return Ok(existing);
        }
        invitations::deactivate_codes(&tx, inviter_id, now)?;
        tracing::debug!(inviter_id, code = %existing.code, "expired code retired");
    }

    let expires_at = policy.code_expiry(now);
    for _ in 0..MAX_CODE_ATTEMPTS {
        let candidate = generate_code(policy.code_length);
        // The write lock is held and the inviter has no active code, so a
        // constraint failure here is a collision on the code string.
        match invitations::insert_code(&tx, inviter_id, &candidate, expires_at, now) {
            Ok(id) => {
                let code = invitations::code_by_id(&tx, id)?
                    .ok_or_else(|| InviteError::CodeNotFound(candidate.clone()))?;
                tx.commit()?;
                tracing::info!(inviter_id, code = %code.code, "invitation code created");
                return Ok(code);
            }
            Err(DbError::Constraint(_)) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(InviteError::CodeSpaceExhausted)
}

/// Deactivate the inviter's active code. Returns `true` if there was one.
///
/// Invitees already recorded under it keep their link; new signups with
/// the code are rejected.
pub fn deactivate_code(conn: &mut Connection, inviter_id: &str, now: u64) -> Result<bool> {
    let tx = tally_db::immediate(conn)?;
    let changed = invitations::deactivate_codes(&tx, inviter_id, now)?;
    tx.commit()?;
    if changed > 0 {
        tracing::info!(inviter_id, "invitation code deactivated");
    }
    Ok(changed > 0)
}
