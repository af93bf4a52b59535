//! Per-inviter summary.

use rusqlite::Connection;
use serde::Serialize;
use tally_db::queries::{claims, invitations, milestones};
use tally_types::rewards::{InvitationCode, Milestone};
use tally_types::{TriggerKind, UserId};

use crate::Result;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InviteStats {
    pub inviter_id: UserId,
    pub active_code: Option<InvitationCode>,
    pub total_invitations: u32,
    pub successful_invitations: u32,
    pub milestones_paid: u64,
    /// The lowest active milestone not yet reached.
    pub next_milestone: Option<Milestone>,
}

pub fn invite_stats(conn: &Connection, inviter_id: &str) -> Result<InviteStats> {
    let codes = invitations::codes_for_inviter(conn, inviter_id)?;
    let total_invitations: u32 = codes.iter().map(|c| c.total_invitations).sum();
    let successful_invitations: u32 = codes.iter().map(|c| c.successful_invitations).sum();
    let active_code = codes.into_iter().find(|c| c.is_active);

    let next_milestone = milestones::list_active(conn)?
        .into_iter()
        .find(|m| m.threshold > successful_invitations);

    Ok(InviteStats {
        inviter_id: inviter_id.to_string(),
        active_code,
        total_invitations,
        successful_invitations,
        milestones_paid: claims::count_for_user(conn, inviter_id, TriggerKind::Milestone)?,
        next_milestone,
    })
}
