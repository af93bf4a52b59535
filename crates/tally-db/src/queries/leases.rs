//! Time-bounded job leases.
//!
//! A lease lets one process claim a periodic job (the daily batch reset)
//! so a second scheduler instance skips it instead of racing it. A lease
//! whose holder died expires on its own.

use rusqlite::Connection;

use crate::Result;

/// Try to take the lease `name` for `ttl_secs`. Succeeds only if the lease
/// is free or expired; a live lease blocks its own holder too.
pub fn try_acquire(
    conn: &Connection,
    name: &str,
    holder: &str,
    now: u64,
    ttl_secs: u64,
) -> Result<bool> {
    let expires_at = now.saturating_add(ttl_secs) as i64;
    let changed = conn.execute(
        "INSERT INTO job_leases (name, holder, expires_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(name) DO UPDATE SET holder = excluded.holder, expires_at = excluded.expires_at
         WHERE job_leases.expires_at <= ?4",
        rusqlite::params![name, holder, expires_at, now as i64],
    )?;
    Ok(changed == 1)
}

/// Release a lease held by `holder`. Releasing someone else's lease is a no-op.
pub fn release(conn: &Connection, name: &str, holder: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM job_leases WHERE name = ?1 AND holder = ?2",
        rusqlite::params![name, holder],
    )?;
    Ok(())
}
