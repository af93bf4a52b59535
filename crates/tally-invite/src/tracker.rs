//! Recording invitees.

use rusqlite::Connection;
use serde::Serialize;
use tally_db::queries::invitations;
use tally_types::rewards::InvitationStatus;
use tally_types::UserId;

use crate::payouts::{check_milestones, pay_base_bonus, Payout};
use crate::{InviteError, InvitePolicy, Result};

/// A signup that arrived with an invitation code.
#[derive(Clone, Copy, Debug)]
pub struct Signup<'a> {
    pub code: &'a str,
    pub user_id: &'a str,
    pub ip_address: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Recorded {
    pub invitation_id: i64,
    pub inviter_id: UserId,
    pub code_id: i64,
    pub successful_invitations: u32,
    pub payouts: Vec<Payout>,
    /// A payout failed and was left for [`crate::reconcile_rewards`].
    pub deferred: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordOutcome {
    Recorded(Recorded),
    /// This invitee was already recorded under this code. Nothing changed.
    AlreadyRecorded,
}

/// Link a new user to an invitation code and pay the inviter.
///
/// The invitation row and the count increment commit together. The base
/// bonus and any milestone bonuses follow in separate transactions; if
/// they fail the invitation stands and `deferred` is set.
///
/// # Errors
///
/// - [`InviteError::CodeNotFound`], [`InviteError::CodeExpired`]
/// - [`InviteError::InvalidTrigger`] for an inactive code, a
///   self-invitation, an invitee already linked to another code, or an
///   exhausted per-IP limit
pub fn record_invitee(
    conn: &mut Connection,
    policy: &InvitePolicy,
    signup: &Signup<'_>,
    now: u64,
) -> Result<RecordOutcome> {
    let tx = tally_db::immediate(conn)?;

    let code = invitations::code_by_value(&tx, signup.code)?
        .ok_or_else(|| InviteError::CodeNotFound(signup.code.to_string()))?;

    if let Some(existing) = invitations::invitation_for_user(&tx, signup.user_id)? {
        if existing.invitation_code_id == code.id {
            tracing::debug!(invitee = signup.user_id, code = signup.code, "invitee already recorded");
            return Ok(RecordOutcome::AlreadyRecorded);
        }
        return Err(InviteError::InvalidTrigger(format!(
            "user {} is already linked to another invitation code",
            signup.user_id
        )));
    }

    if !code.is_active {
        return Err(InviteError::InvalidTrigger(format!(
            "invitation code {} is no longer active",
            code.code
        )));
    }
    if code.is_expired(now) {
        return Err(InviteError::CodeExpired(code.code));
    }
    if code.inviter_id == signup.user_id {
        return Err(InviteError::InvalidTrigger("self-invitation".into()));
    }
    if let Some(ip) = signup.ip_address.filter(|_| policy.per_ip_limit > 0) {
        if invitations::count_from_ip(&tx, code.id, ip)? >= policy.per_ip_limit {
            tracing::warn!(
                inviter_id = %code.inviter_id,
                invitee = signup.user_id,
                ip,
                "per-ip invitation limit reached"
            );
            return Err(InviteError::InvalidTrigger(format!(
                "too many invitations from {ip}"
            )));
        }
    }

    let Some(invitation_id) = invitations::insert_invitation(
        &tx,
        code.id,
        signup.user_id,
        InvitationStatus::Completed,
        signup.ip_address,
        signup.user_agent,
        now,
    )?
    else {
        return Ok(RecordOutcome::AlreadyRecorded);
    };
    let successful_invitations = invitations::increment_counts(&tx, code.id, now)?;
    tx.commit()?;

    tracing::info!(
        inviter_id = %code.inviter_id,
        invitee = signup.user_id,
        invitation_id,
        successful_invitations,
        "invitee recorded"
    );

    let mut payouts = Vec::new();
    let mut deferred = false;

    match pay_base_bonus(conn, policy, invitation_id, &code.inviter_id, now) {
        Ok(payout) => payouts.extend(payout),
        Err(e) => {
            tracing::warn!(
                inviter_id = %code.inviter_id,
                trigger_key = invitation_id,
                error = %e,
                "base bonus deferred"
            );
            deferred = true;
        }
    }
    match check_milestones(conn, &code.inviter_id, now) {
        Ok(paid) => payouts.extend(paid),
        Err(e) => {
            tracing::warn!(inviter_id = %code.inviter_id, error = %e, "milestone check deferred");
            deferred = true;
        }
    }

    Ok(RecordOutcome::Recorded(Recorded {
        invitation_id,
        inviter_id: code.inviter_id,
        code_id: code.id,
        successful_invitations,
        payouts,
        deferred,
    }))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Recount {
    pub code_id: i64,
    pub inviter_id: UserId,
    pub previous: u32,
    pub successful: u32,
    pub payouts: Vec<Payout>,
}

/// Recompute a code's successful count from its invitation rows and pay
/// any milestones newly reached.
pub fn recount(conn: &mut Connection, code_id: i64, now: u64) -> Result<Recount> {
    let tx = tally_db::immediate(conn)?;
    let code = invitations::code_by_id(&tx, code_id)?
        .ok_or_else(|| InviteError::CodeNotFound(code_id.to_string()))?;
    let successful = invitations::count_completed(&tx, code_id)?;
    if successful != code.successful_invitations {
        invitations::set_successful(&tx, code_id, successful, now)?;
        tracing::info!(
            code_id,
            previous = code.successful_invitations,
            successful,
            "invitation count corrected"
        );
    }
    tx.commit()?;

    let payouts = check_milestones(conn, &code.inviter_id, now)?;
    Ok(Recount {
        code_id,
        inviter_id: code.inviter_id,
        previous: code.successful_invitations,
        successful,
        payouts,
    })
}
