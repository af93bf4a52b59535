//! Paying inviters.

use std::collections::BTreeSet;

use rusqlite::Connection;
use serde::Serialize;
use tally_db::queries::{invitations, milestones};
use tally_ledger::Applied;
use tally_rewards::{Issuance, RewardRequest, Trigger};
use tally_types::events::RewardIssued;
use tally_types::{TransactionType, TriggerKind, UserId};

use crate::{InvitePolicy, Result};

/// A reward paid to an inviter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Payout {
    pub trigger_kind: TriggerKind,
    pub trigger_key: String,
    pub applied: Applied,
}

impl Payout {
    fn from_issuance(trigger: &Trigger, issuance: Issuance) -> Option<Self> {
        match issuance {
            Issuance::Issued { applied, .. } => Some(Self {
                trigger_kind: trigger.kind,
                trigger_key: trigger.key.clone(),
                applied,
            }),
            Issuance::AlreadyIssued => None,
        }
    }

    pub fn event(&self) -> RewardIssued {
        RewardIssued {
            user_id: self.applied.user_id.clone(),
            trigger_kind: self.trigger_kind,
            trigger_key: self.trigger_key.clone(),
            amount: self.applied.amount,
        }
    }
}

/// Pay the base bonus for one completed invitation, at most once.
pub(crate) fn pay_base_bonus(
    conn: &mut Connection,
    policy: &InvitePolicy,
    invitation_id: i64,
    inviter_id: &str,
    now: u64,
) -> Result<Option<Payout>> {
    if policy.base_bonus <= 0 {
        return Ok(None);
    }
    let trigger = Trigger::invitation(invitation_id);
    let issuance = tally_rewards::issue_reward(
        conn,
        &RewardRequest {
            trigger: &trigger,
            user_id: inviter_id,
            amount: policy.base_bonus,
            tx_type: TransactionType::Bonus,
            description: "invitation bonus",
        },
        now,
    )?;
    Ok(Payout::from_issuance(&trigger, issuance))
}

/// Pay every active milestone the inviter has reached and not been paid.
///
/// The count is the inviter's successful invitations across all of their
/// codes. Several milestones may be paid in one call; each at most once
/// per inviter.
pub fn check_milestones(conn: &mut Connection, inviter_id: &str, now: u64) -> Result<Vec<Payout>> {
    let tx = tally_db::immediate(conn)?;
    let reached = invitations::successful_for_inviter(&tx, inviter_id)?;

    let mut paid = Vec::new();
    for milestone in milestones::list_active(&tx)? {
        if milestone.threshold > reached || milestone.bonus_points <= 0 {
            continue;
        }
        let trigger = Trigger::milestone(inviter_id, milestone.id);
        let description = format!("invitation milestone: {} invitations", milestone.threshold);
        let issuance = tally_rewards::issue_in(
            &tx,
            &RewardRequest {
                trigger: &trigger,
                user_id: inviter_id,
                amount: milestone.bonus_points,
                tx_type: TransactionType::Bonus,
                description: &description,
            },
            now,
        )?;
        paid.extend(Payout::from_issuance(&trigger, issuance));
    }
    tx.commit()?;

    if !paid.is_empty() {
        tracing::info!(inviter_id, reached, paid = paid.len(), "milestones paid");
    }
    Ok(paid)
}

/// What a reconciliation pass repaid.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RewardReconciliation {
    pub base_bonuses: Vec<Payout>,
    pub milestones: Vec<Payout>,
    /// Inviters whose payouts still failed, with the error.
    pub failed: Vec<(UserId, String)>,
}

/// Pay every base bonus and milestone that a completed invitation earned
/// but that has no claim yet, for example after a crash between recording
/// an invitee and paying the inviter.
pub fn reconcile_rewards(
    conn: &mut Connection,
    policy: &InvitePolicy,
    now: u64,
) -> Result<RewardReconciliation> {
    let mut report = RewardReconciliation::default();

    if policy.base_bonus > 0 {
        for (invitation, inviter_id) in invitations::completed_without_claim(conn)? {
            match pay_base_bonus(conn, policy, invitation.id, &inviter_id, now) {
                Ok(payout) => report.base_bonuses.extend(payout),
                Err(e) => {
                    tracing::error!(
                        inviter_id = %inviter_id,
                        trigger_key = invitation.id,
                        error = %e,
                        "base bonus still unpaid"
                    );
                    report.failed.push((inviter_id, e.to_string()));
                }
            }
        }
    }

    let inviters: BTreeSet<UserId> = invitations::codes_with_successes(conn)?
        .into_iter()
        .map(|code| code.inviter_id)
        .collect();
    for inviter_id in inviters {
        match check_milestones(conn, &inviter_id, now) {
            Ok(paid) => report.milestones.extend(paid),
            Err(e) => {
                tracing::error!(inviter_id = %inviter_id, error = %e, "milestones still unpaid");
                report.failed.push((inviter_id, e.to_string()));
            }
        }
    }

    if !report.base_bonuses.is_empty() || !report.milestones.is_empty() {
        tracing::info!(
            base_bonuses = report.base_bonuses.len(),
            milestones = report.milestones.len(),
            "missing invitation rewards repaid"
        );
    }
    Ok(report)
}
