//! Code definitions.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tally_db::queries::redemption_codes;
use tally_db::DbError;
use tally_types::codes::generate_code;
use tally_types::redemption::RedemptionCode;
use tally_types::{MembershipTier, RedemptionKind};

use crate::{RedeemError, Result};

const MAX_CODE_ATTEMPTS: usize = 8;

/// What a batch of new codes grants.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeDefinition {
    pub kind: RedemptionKind,
    #[serde(default)]
    pub value: i64,
    #[serde(default)]
    pub membership_tier: Option<MembershipTier>,
    #[serde(default)]
    pub membership_days: Option<u32>,
    #[serde(default)]
    pub expires_at: Option<u64>,
}

impl CodeDefinition {
    fn validate(&self) -> Result<()> {
        let ok = match self.kind {
            RedemptionKind::Points => self.value > 0,
            RedemptionKind::MembershipDays => {
                self.membership_days.is_some_and(|d| d > 0)
                    && self.membership_tier.map_or(true, MembershipTier::is_paid)
            }
            RedemptionKind::Membership => {
                self.membership_tier.is_some_and(MembershipTier::is_paid)
                    && self.membership_days.map_or(true, |d| d > 0)
            }
        };
        if ok {
            Ok(())
        } else {
            Err(RedeemError::InvalidCode(format!(
                "incomplete {} definition",
                self.kind
            )))
        }
    }
}

/// Generate `count` new single-use codes of `code_length` characters.
pub fn create_codes(
    conn: &mut Connection,
    def: &CodeDefinition,
    count: usize,
    code_length: usize,
    now: u64,
) -> Result<Vec<RedemptionCode>> {
    def.validate()?;

    let tx = tally_db::immediate(conn)?;
    let mut created = Vec::with_capacity(count);
    for _ in 0..count {
        created.push(insert_unique(&tx, def, code_length, now)?);
    }
    tx.commit()?;

    tracing::info!(kind = %def.kind, count, "redemption codes created");
    Ok(created)
}

fn insert_unique(
    conn: &Connection,
    def: &CodeDefinition,
    code_length: usize,
    now: u64,
) -> Result<RedemptionCode> {
    for _ in 0..MAX_CODE_ATTEMPTS {
        let code = RedemptionCode {
            code: generate_code(code_length),
            kind: def.kind,
            value: def.value,
            membership_tier: def.membership_tier,
            membership_days: def.membership_days,
            is_used: false,
            used_by: None,
            used_at: None,
            expires_at: def.expires_at,
            created_at: now,
        };
        match redemption_codes::insert(conn, &code) {
            Ok(()) => return Ok(code),
            Err(DbError::Constraint(_)) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(RedeemError::CodeSpaceExhausted)
}

/// Look up a code.
pub fn get_code(conn: &Connection, code: &str) -> Result<Option<RedemptionCode>> {
    Ok(redemption_codes::find(conn, code)?)
}

/// Codes a user has redeemed, newest first.
pub fn redeemed_by(conn: &Connection, user_id: &str) -> Result<Vec<RedemptionCode>> {
    Ok(redemption_codes::used_by(conn, user_id)?)
}
