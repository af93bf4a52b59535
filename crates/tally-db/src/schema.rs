//! SQL schema definitions.

/// Complete schema for the v1 ledger database.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Balances & transaction log
-- ============================================================

CREATE TABLE IF NOT EXISTS balances (
    user_id TEXT PRIMARY KEY,
    points INTEGER NOT NULL DEFAULT 0 CHECK (points >= 0),
    tier TEXT NOT NULL DEFAULT 'free',
    daily_allowance INTEGER NOT NULL DEFAULT 0,
    last_reset_day INTEGER NOT NULL,
    is_member INTEGER NOT NULL DEFAULT 0,
    membership_expires_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_balances_reset ON balances(is_member, last_reset_day);

CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL REFERENCES balances(user_id),
    tx_type TEXT NOT NULL,
    amount INTEGER NOT NULL CHECK (amount != 0),
    description TEXT NOT NULL,
    balance_before INTEGER NOT NULL,
    balance_after INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    related_id TEXT,
    CHECK (balance_after = balance_before + amount)
);

CREATE INDEX IF NOT EXISTS idx_transactions_user ON transactions(user_id, created_at);

CREATE TRIGGER IF NOT EXISTS transactions_no_update
BEFORE UPDATE ON transactions
BEGIN
    SELECT RAISE(ABORT, 'transactions are append-only');
END;

CREATE TRIGGER IF NOT EXISTS transactions_no_delete
BEFORE DELETE ON transactions
BEGIN
    SELECT RAISE(ABORT, 'transactions are append-only');
END;

-- ============================================================
-- Rewards
-- ============================================================

CREATE TABLE IF NOT EXISTS reward_claims (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    trigger_kind TEXT NOT NULL,
    trigger_key TEXT NOT NULL,
    user_id TEXT NOT NULL,
    amount INTEGER NOT NULL DEFAULT 0,
    transaction_id INTEGER REFERENCES transactions(id),
    claimed_at INTEGER NOT NULL,
    UNIQUE (trigger_kind, trigger_key)
);

CREATE INDEX IF NOT EXISTS idx_reward_claims_user ON reward_claims(user_id);

-- ============================================================
-- Invitations
-- ============================================================

CREATE TABLE IF NOT EXISTS invitation_codes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    inviter_id TEXT NOT NULL,
    code TEXT NOT NULL UNIQUE,
    total_invitations INTEGER NOT NULL DEFAULT 0,
    successful_invitations INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1,
    expires_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_invitation_codes_active
    ON invitation_codes(inviter_id) WHERE is_active = 1;

CREATE TABLE IF NOT EXISTS invitations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    invitation_code_id INTEGER NOT NULL REFERENCES invitation_codes(id),
    invited_user_id TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL,
    ip_address TEXT,
    user_agent TEXT,
    created_at INTEGER NOT NULL,
    completed_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_invitations_code ON invitations(invitation_code_id, ip_address);

CREATE TABLE IF NOT EXISTS milestones (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    threshold INTEGER NOT NULL UNIQUE,
    bonus_points INTEGER NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1
);

-- ============================================================
-- Redemption codes
-- ============================================================

CREATE TABLE IF NOT EXISTS redemption_codes (
    code TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    value INTEGER NOT NULL DEFAULT 0,
    membership_tier TEXT,
    membership_days INTEGER,
    is_used INTEGER NOT NULL DEFAULT 0,
    used_by TEXT,
    used_at INTEGER,
    expires_at INTEGER,
    created_at INTEGER NOT NULL
);

-- ============================================================
-- Settings & scheduling
-- ============================================================

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS job_leases (
    name TEXT PRIMARY KEY,
    holder TEXT NOT NULL,
    expires_at INTEGER NOT NULL
);
"#;
