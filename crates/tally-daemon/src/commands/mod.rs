//! IPC command handlers.
//!
//! Each submodule implements the commands for one component. Handlers
//! parse params, run the library call on a pooled connection off the async
//! runtime, and emit events once the call has committed.

pub mod diagnostics;
pub mod invite;
pub mod ledger;
pub mod membership;
pub mod redeem;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use tally_ledger::Applied;
use tally_types::events::RewardIssued;
use tally_types::TriggerKind;

use crate::rpc::{RpcError, ServiceError};
use crate::DaemonState;

type Result<T> = std::result::Result<T, RpcError>;

/// Names an operation for retry logging.
#[derive(Debug, Clone)]
pub(crate) struct Operation {
    pub name: &'static str,
    pub user_id: String,
    pub trigger_key: String,
}

impl Operation {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            user_id: String::new(),
            trigger_key: String::new(),
        }
    }

    pub fn user(mut self, user_id: &str) -> Self {
        self.user_id = user_id.to_string();
        self
    }

    pub fn trigger(mut self, key: &str) -> Self {
        self.trigger_key = key.to_string();
        self
    }
}

/// Run `f` on a pooled connection in the blocking pool.
///
/// Transient storage failures are retried `busy_retries` times with a
/// linear backoff before surfacing as `TRY_AGAIN_LATER`. `f` may run more
/// than once, so it must be a complete atomic unit.
pub(crate) async fn run_blocking<T, E, F>(
    state: &Arc<DaemonState>,
    op: Operation,
    f: F,
) -> Result<T>
where
    T: Send + 'static,
    E: ServiceError,
    F: Fn(&mut Connection) -> std::result::Result<T, E> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let retries = state.config.storage.busy_retries;
    let backoff = Duration::from_millis(state.config.storage.retry_backoff_ms);

    let mut attempt = 0;
    loop {
        let pool = Arc::clone(&state.pool);
        let call = Arc::clone(&f);
        let outcome = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(E::from)?;
            call(&mut *conn)
        })
        .await
        .map_err(|e| RpcError::internal_error(&format!("task failed: {e}")))?;

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if e.transient() && attempt < retries => {
                attempt += 1;
                tracing::debug!(
                    operation = op.name,
                    user_id = %op.user_id,
                    attempt,
                    error = %e,
                    "storage busy, retrying"
                );
                tokio::time::sleep(backoff * attempt).await;
            }
            Err(e) if e.transient() => {
                tracing::error!(
                    operation = op.name,
                    user_id = %op.user_id,
                    trigger_key = %op.trigger_key,
                    attempts = attempt + 1,
                    error = %e,
                    "storage unavailable, giving up"
                );
                return Err(RpcError::try_again_later(op.name));
            }
            Err(e) => return Err(e.to_rpc()),
        }
    }
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| RpcError::internal_error(&format!("encode: {e}")))
}

pub(crate) fn required_str(params: &Value, key: &str) -> Result<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| RpcError::invalid_params(&format!("{key} required")))
}

pub(crate) fn optional_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

pub(crate) fn required_i64(params: &Value, key: &str) -> Result<i64> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| RpcError::invalid_params(&format!("{key} required")))
}

pub(crate) fn optional_i64(params: &Value, key: &str) -> Result<Option<i64>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| RpcError::invalid_params(&format!("{key} must be an integer"))),
    }
}

/// Parse a string param through its `FromStr` label.
pub(crate) fn required_label<T: FromStr>(params: &Value, key: &str) -> Result<T> {
    let raw = required_str(params, key)?;
    raw.parse()
        .map_err(|_| RpcError::invalid_params(&format!("unknown {key}: {raw}")))
}

pub(crate) fn reward_issued(
    applied: &Applied,
    trigger_kind: TriggerKind,
    trigger_key: &str,
) -> RewardIssued {
    RewardIssued {
        user_id: applied.user_id.clone(),
        trigger_kind,
        trigger_key: trigger_key.to_string(),
        amount: applied.amount,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::config::TallyConfig;
    use crate::events::EventBus;
    use crate::DaemonState;

    /// State over an in-memory single-connection pool.
    pub fn state() -> Arc<DaemonState> {
        state_with(TallyConfig::default())
    }

    pub fn state_with(config: TallyConfig) -> Arc<DaemonState> {
        let pool = tally_db::pool::Pool::open_memory().expect("pool");
        {
            let mut conn = pool.get().expect("conn");
            config.invite.sync_milestones(&mut *conn).expect("milestones");
        }
        Arc::new(DaemonState {
            pool,
            config,
            event_bus: EventBus::new(64),
            holder: "test".to_string(),
            started_at: 0,
        })
    }
}
