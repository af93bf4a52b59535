//! Configuration file management.
//!
//! `$TALLY_DATA_DIR/config.toml`, every section optional.

use std::ops::RangeInclusive;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tally_invite::InvitePolicy;
use tally_membership::MembershipPolicy;

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TallyConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    /// Tier allowances, prices and plan length.
    #[serde(default)]
    pub membership: MembershipPolicy,
    /// Invitation bonuses, milestones and code settings.
    #[serde(default)]
    pub invite: InvitePolicy,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub advanced: AdvancedConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
    /// Open connections in the pool.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Extra attempts after a busy/locked store before giving up.
    #[serde(default = "default_busy_retries")]
    pub busy_retries: u32,
    /// Linear backoff step between attempts.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// Ledger configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Shift of the daily reset boundary from 00:00 UTC, in seconds.
    #[serde(default)]
    pub day_offset_secs: i64,
    /// Points granted once when an account is opened. 0 disables.
    #[serde(default)]
    pub signup_bonus: i64,
}

/// Daily job scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// How often the scheduler checks whether the day has rolled over.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

/// Advanced configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    /// Log level: "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default value functions

fn default_pool_size() -> usize {
    4
}

fn default_busy_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    50
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    3600
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: String::new(),
            pool_size: default_pool_size(),
            busy_retries: default_busy_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval_secs(),
        }
    }
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Allowed length of generated invitation and redemption codes.
pub const CODE_LENGTH_RANGE: RangeInclusive<usize> = 4..=32;

impl TallyConfig {
    /// Load configuration from the default config file location.
    ///
    /// Falls back to defaults if file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::parse(&content)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse a config file body.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: TallyConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the services cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            CODE_LENGTH_RANGE.contains(&self.invite.code_length),
            "invite.code_length must be between {} and {}, got {}",
            CODE_LENGTH_RANGE.start(),
            CODE_LENGTH_RANGE.end(),
            self.invite.code_length
        );
        anyhow::ensure!(self.storage.pool_size > 0, "storage.pool_size must be at least 1");
        Ok(())
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> PathBuf {
        if self.storage.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.storage.data_dir)
        }
    }

    /// Day index of `now` under the configured reset boundary.
    pub fn today(&self, now: u64) -> u64 {
        tally_types::day_index(now, self.ledger.day_offset_secs)
    }

    fn config_path() -> PathBuf {
        Self::default_data_dir().join("config.toml")
    }

    /// Platform-specific default data directory.
    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("TALLY_DATA_DIR") {
            return PathBuf::from(dir);
        }
        #[cfg(target_os = "macos")]
        {
            dirs_fallback("Library/Application Support/Tally")
        }
        #[cfg(not(target_os = "macos"))]
        {
            dirs_fallback(".tally")
        }
    }
}

/// Fallback home directory resolution.
fn dirs_fallback(subpath: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(subpath))
        .unwrap_or_else(|_| PathBuf::from("/tmp/tally"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TallyConfig::default();
        assert_eq!(config.storage.pool_size, 4);
        assert_eq!(config.storage.busy_retries, 3);
        assert_eq!(config.ledger.signup_bonus, 0);
        assert_eq!(config.membership.premium_allowance, 500);
        assert_eq!(config.invite.base_bonus, 20);
        assert_eq!(config.invite.milestones.len(), 2);
        assert!(config.scheduler.enabled);
        assert_eq!(config.advanced.log_level, "info");
    }

    #[test]
    fn test_config_serialization() {
        let config = TallyConfig::default();
        let toml_str = toml::to_string(&config).expect("serialize");
        let _parsed: TallyConfig = toml::from_str(&toml_str).expect("parse");
    }

    #[test]
    fn test_partial_config() {
        let config = TallyConfig::parse(
            r#"
            [ledger]
            day_offset_secs = 28800
            signup_bonus = 50

            [membership]
            pro_allowance = 5000

            [[invite.milestones]]
            threshold = 5
            bonus_points = 40
            "#,
        )
        .expect("parse");

        assert_eq!(config.ledger.signup_bonus, 50);
        assert_eq!(config.membership.pro_allowance, 5000);
        assert_eq!(config.membership.premium_allowance, 500);
        assert_eq!(config.invite.milestones.len(), 1);
        assert_eq!(config.invite.base_bonus, 20);
        assert_eq!(config.storage.retry_backoff_ms, 50);
    }

    #[test]
    fn test_rejects_unusable_code_length() {
        for body in ["[invite]\ncode_length = 0", "[invite]\ncode_length = 33"] {
            assert!(TallyConfig::parse(body).is_err(), "accepted {body:?}");
        }
        let config = TallyConfig::parse("[invite]\ncode_length = 4").expect("parse");
        assert_eq!(config.invite.code_length, 4);
        assert!(TallyConfig::parse("[storage]\npool_size = 0").is_err());
    }

    #[test]
    fn test_today_uses_offset() {
        let config = TallyConfig {
            ledger: LedgerConfig {
                day_offset_secs: 8 * 3600,
                signup_bonus: 0,
            },
            ..TallyConfig::default()
        };
        // 20:00 UTC on day 3 is day 4 at UTC+8.
        assert_eq!(config.today(3 * 86_400 + 20 * 3600), 4);
    }
}
