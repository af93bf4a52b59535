//! Issuing rewards.

use rusqlite::Connection;
use serde::Serialize;
use tally_db::queries::claims;
use tally_ledger::{Applied, TransactionRequest};
use tally_types::events::RewardIssued;
use tally_types::rewards::RewardClaim;
use tally_types::TransactionType;

use crate::{Result, RewardError, Trigger};

/// A reward to issue for one trigger.
#[derive(Clone, Debug)]
pub struct RewardRequest<'a> {
    pub trigger: &'a Trigger,
    pub user_id: &'a str,
    pub amount: i64,
    /// BONUS for invitation rewards, REDEEM for codes.
    pub tx_type: TransactionType,
    pub description: &'a str,
}

/// What happened to a reward request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Issuance {
    Issued { claim_id: i64, applied: Applied },
    /// The trigger was claimed before. Nothing was credited.
    AlreadyIssued,
}

impl Issuance {
    pub fn applied(&self) -> Option<&Applied> {
        match self {
            Issuance::Issued { applied, .. } => Some(applied),
            Issuance::AlreadyIssued => None,
        }
    }

    pub fn is_issued(&self) -> bool {
        matches!(self, Issuance::Issued { .. })
    }
}

/// Issue a reward unless its trigger was already claimed.
///
/// Claim and credit commit together; if the credit fails the claim is
/// rolled back with it and the trigger can be retried later.
pub fn issue_reward(conn: &mut Connection, req: &RewardRequest<'_>, now: u64) -> Result<Issuance> {
    let tx = tally_db::immediate(conn)?;
    let issuance = issue_in(&tx, req, now)?;
    tx.commit()?;
    Ok(issuance)
}

/// [`issue_reward`] inside the caller's transaction.
///
/// On error the claim may already be inserted; the caller must roll back.
pub fn issue_in(conn: &Connection, req: &RewardRequest<'_>, now: u64) -> Result<Issuance> {
    if req.amount <= 0 {
        return Err(RewardError::InvalidAmount(req.amount));
    }

    let Some(claim_id) = claims::try_insert(
        conn,
        req.trigger.kind,
        &req.trigger.key,
        req.user_id,
        req.amount,
        now,
    )?
    else {
        tracing::debug!(
            user_id = req.user_id,
            trigger_kind = %req.trigger.kind,
            trigger_key = %req.trigger.key,
            "reward already issued"
        );
        return Ok(Issuance::AlreadyIssued);
    };

    let applied = tally_ledger::apply_in(
        conn,
        &TransactionRequest {
            user_id: req.user_id,
            tx_type: req.tx_type,
            amount: req.amount,
            description: req.description,
            related_id: Some(&req.trigger.key),
        },
        now,
    )?;
    claims::set_transaction(conn, claim_id, applied.transaction_id)?;

    tracing::info!(
        user_id = req.user_id,
        trigger_kind = %req.trigger.kind,
        trigger_key = %req.trigger.key,
        amount = req.amount,
        "reward issued"
    );
    Ok(Issuance::Issued { claim_id, applied })
}

/// Reserve a trigger without crediting points, for rewards paid in
/// something other than points. Returns `None` if already claimed.
pub fn reserve_in(
    conn: &Connection,
    trigger: &Trigger,
    user_id: &str,
    now: u64,
) -> Result<Option<i64>> {
    Ok(claims::try_insert(conn, trigger.kind, &trigger.key, user_id, 0, now)?)
}

/// The claim recorded for a trigger, if any.
pub fn find_claim(conn: &Connection, trigger: &Trigger) -> Result<Option<RewardClaim>> {
    Ok(claims::find(conn, trigger.kind, &trigger.key)?)
}

/// All claims paid to a user, oldest first.
pub fn list_claims(conn: &Connection, user_id: &str) -> Result<Vec<RewardClaim>> {
    Ok(claims::list_for_user(conn, user_id)?)
}

impl RewardRequest<'_> {
    /// Event for observers once the issuance has committed.
    pub fn event(&self) -> RewardIssued {
        RewardIssued {
            user_id: self.user_id.to_string(),
            trigger_kind: self.trigger.kind,
            trigger_key: self.trigger.key.clone(),
            amount: self.amount,
        }
    }
}
