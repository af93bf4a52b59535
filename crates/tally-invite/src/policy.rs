//! Invitation reward configuration, read from the `[invite]` config section.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tally_db::queries::milestones;
use tally_types::SECONDS_PER_DAY;

use crate::Result;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneConfig {
    pub threshold: u32,
    pub bonus_points: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitePolicy {
    /// Points paid to the inviter per completed invitation. 0 disables.
    #[serde(default = "default_base_bonus")]
    pub base_bonus: i64,
    #[serde(default = "default_code_length")]
    pub code_length: usize,
    /// Code lifetime in days. 0 means codes never expire.
    #[serde(default)]
    pub code_ttl_days: u32,
    /// Maximum invitations per code from one IP address. 0 means unlimited.
    #[serde(default)]
    pub per_ip_limit: u32,
    #[serde(default = "default_milestones")]
    pub milestones: Vec<MilestoneConfig>,
}

fn default_base_bonus() -> i64 {
    20
}
fn default_code_length() -> usize {
    8
}
fn default_milestones() -> Vec<MilestoneConfig> {
    vec![
        MilestoneConfig {
            threshold: 10,
            bonus_points: 100,
        },
        MilestoneConfig {
            threshold: 20,
            bonus_points: 300,
        },
    ]
}

impl Default for InvitePolicy {
    fn default() -> Self {
        Self {
            base_bonus: default_base_bonus(),
            code_length: default_code_length(),
            code_ttl_days: 0,
            per_ip_limit: 0,
            milestones: default_milestones(),
        }
    }
}

impl InvitePolicy {
    /// Expiry for a code created at `now`.
    pub fn code_expiry(&self, now: u64) -> Option<u64> {
        (self.code_ttl_days > 0)
            .then(|| now.saturating_add(u64::from(self.code_ttl_days) * SECONDS_PER_DAY))
    }

    /// Write the configured milestones to the store. Milestones removed
    /// from config are deactivated; their past payouts remain.
    pub fn sync_milestones(&self, conn: &mut Connection) -> Result<()> {
        let pairs: Vec<(u32, i64)> = self
            .milestones
            .iter()
            .map(|m| (m.threshold, m.bonus_points))
            .collect();
        let tx = tally_db::immediate(conn)?;
        milestones::sync(&tx, &pairs)?;
        tx.commit()?;
        tracing::debug!(count = pairs.len(), "milestones synced");
        Ok(())
    }
}
