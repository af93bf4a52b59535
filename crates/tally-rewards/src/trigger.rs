//! Trigger keys.

use std::fmt;

use tally_types::TriggerKind;

/// The external event a reward answers to.
///
/// Two triggers with the same kind and key are the same event, however
/// many times it is delivered.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Trigger {
    pub kind: TriggerKind,
    pub key: String,
}

impl Trigger {
    /// One-off welcome bonus for a new account.
    pub fn signup(user_id: &str) -> Self {
        Self {
            kind: TriggerKind::Signup,
            key: user_id.to_string(),
        }
    }

    /// Base bonus for one completed invitation.
    pub fn invitation(invitation_id: i64) -> Self {
        Self {
            kind: TriggerKind::Invitation,
            key: invitation_id.to_string(),
        }
    }

    /// A milestone reached by an inviter. Paid once per pair.
    pub fn milestone(inviter_id: &str, milestone_id: i64) -> Self {
        Self {
            kind: TriggerKind::Milestone,
            key: format!("{inviter_id}:{milestone_id}"),
        }
    }

    /// Consumption of a redemption code.
    pub fn redemption(code: &str) -> Self {
        Self {
            kind: TriggerKind::Redemption,
            key: code.to_string(),
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys() {
        assert_eq!(Trigger::invitation(42).key, "42");
        assert_eq!(Trigger::milestone("alice", 3).key, "alice:3");
        assert_eq!(Trigger::redemption("ABCD").to_string(), "redemption/ABCD");
    }

    #[test]
    fn test_kinds_separate_keyspaces() {
        assert_ne!(Trigger::signup("7"), Trigger::invitation(7));
    }
}
