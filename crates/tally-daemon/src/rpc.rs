//! JSON-RPC server over Unix socket.
//!
//! Listens on a Unix domain socket, accepts connections, and dispatches
//! newline-delimited JSON-RPC 2.0 calls to the command handlers. A
//! connection that calls `subscribe_events` becomes a one-way stream of
//! event notifications.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tally_db::DbError;
use tally_invite::InviteError;
use tally_ledger::LedgerError;
use tally_membership::MembershipError;
use tally_redeem::RedeemError;
use tally_rewards::RewardError;
use tally_types::events::Event;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixListener;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::commands;
use crate::events::EventFilter;
use crate::DaemonState;

/// JSON-RPC request.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request ID.
    pub id: serde_json::Value,
    /// Method name.
    pub method: String,
    /// Parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// JSON-RPC response.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    /// JSON-RPC version.
    pub jsonrpc: String,
    /// Request ID.
    pub id: serde_json::Value,
    /// Result or error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// Server-pushed event notification.
#[derive(Debug, Serialize)]
pub struct RpcNotification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    pub params: NotificationParams<'a>,
}

#[derive(Debug, Serialize)]
pub struct NotificationParams<'a> {
    pub subscription_id: &'a str,
    pub event: &'a Event,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RpcError {
    /// Error code.
    pub code: i32,
    /// Error name.
    pub message: String,
    /// Optional structured data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcResponse {
    /// Create a success response.
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: serde_json::Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

impl RpcError {
    fn new(code: i32, message: &str, data: Option<serde_json::Value>) -> Self {
        Self {
            code,
            message: message.to_string(),
            data,
        }
    }

    // Standard JSON-RPC errors

    /// Parse error (-32700).
    pub fn parse_error() -> Self {
        Self::new(-32700, "PARSE_ERROR", None)
    }

    /// Invalid request (-32600).
    pub fn invalid_request() -> Self {
        Self::new(-32600, "INVALID_REQUEST", None)
    }

    /// Method not found (-32601).
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            -32601,
            "METHOD_NOT_FOUND",
            Some(serde_json::json!({"method": method})),
        )
    }

    /// Invalid params (-32602).
    pub fn invalid_params(detail: &str) -> Self {
        Self::new(
            -32602,
            "INVALID_PARAMS",
            Some(serde_json::json!({"detail": detail})),
        )
    }

    /// Internal error (-32603).
    pub fn internal_error(detail: &str) -> Self {
        Self::new(
            -32603,
            "INTERNAL_ERROR",
            Some(serde_json::json!({"detail": detail})),
        )
    }

    // Ledger errors

    /// Insufficient balance (-32040).
    pub fn insufficient_balance(required: i64, available: i64) -> Self {
        Self::new(
            -32040,
            "INSUFFICIENT_BALANCE",
            Some(serde_json::json!({"required": required, "available": available})),
        )
    }

    /// User not found (-32041).
    pub fn user_not_found(user_id: &str) -> Self {
        Self::new(
            -32041,
            "USER_NOT_FOUND",
            Some(serde_json::json!({"user_id": user_id})),
        )
    }

    // Code errors

    /// Code not found (-32050).
    pub fn code_not_found(code: &str) -> Self {
        Self::new(
            -32050,
            "CODE_NOT_FOUND",
            Some(serde_json::json!({"code": code})),
        )
    }

    /// Code expired (-32051).
    pub fn code_expired(code: &str) -> Self {
        Self::new(-32051, "CODE_EXPIRED", Some(serde_json::json!({"code": code})))
    }

    /// Code already used (-32052).
    pub fn code_already_used(code: &str) -> Self {
        Self::new(
            -32052,
            "CODE_ALREADY_USED",
            Some(serde_json::json!({"code": code})),
        )
    }

    /// Invalid trigger (-32053).
    pub fn invalid_trigger(detail: &str) -> Self {
        Self::new(
            -32053,
            "INVALID_TRIGGER",
            Some(serde_json::json!({"detail": detail})),
        )
    }

    // Availability

    /// Storage stayed busy through every retry (-32090).
    pub fn try_again_later(operation: &str) -> Self {
        Self::new(
            -32090,
            "TRY_AGAIN_LATER",
            Some(serde_json::json!({"operation": operation})),
        )
    }

    /// Another process holds the batch reset lease (-32091).
    pub fn batch_in_progress() -> Self {
        Self::new(-32091, "BATCH_IN_PROGRESS", None)
    }
}

/// A library error the command layer can retry or report.
pub trait ServiceError: std::fmt::Display + From<DbError> + Send + 'static {
    /// True when the same call may succeed if retried.
    fn transient(&self) -> bool;
    /// The RPC error reported for a non-transient failure.
    fn to_rpc(&self) -> RpcError;
}

impl ServiceError for DbError {
    fn transient(&self) -> bool {
        self.is_transient()
    }

    fn to_rpc(&self) -> RpcError {
        RpcError::internal_error(&self.to_string())
    }
}

impl ServiceError for LedgerError {
    fn transient(&self) -> bool {
        self.is_transient()
    }

    fn to_rpc(&self) -> RpcError {
        match self {
            LedgerError::UserNotFound(user_id) => RpcError::user_not_found(user_id),
            LedgerError::InsufficientBalance {
                required,
                available,
            } => RpcError::insufficient_balance(*required, *available),
            LedgerError::ZeroAmount => RpcError::invalid_params("amount must not be zero"),
            LedgerError::Overflow => RpcError::invalid_params("amount out of range"),
            other => RpcError::internal_error(&other.to_string()),
        }
    }
}

impl ServiceError for MembershipError {
    fn transient(&self) -> bool {
        self.is_transient()
    }

    fn to_rpc(&self) -> RpcError {
        match self {
            MembershipError::UserNotFound(user_id) => RpcError::user_not_found(user_id),
            MembershipError::InsufficientBalance {
                required,
                available,
            } => RpcError::insufficient_balance(*required, *available),
            MembershipError::InvalidTier(_) | MembershipError::InvalidDuration => {
                RpcError::invalid_params(&self.to_string())
            }
            MembershipError::BatchInProgress => RpcError::batch_in_progress(),
            MembershipError::Ledger(e) => e.to_rpc(),
            other => RpcError::internal_error(&other.to_string()),
        }
    }
}

impl ServiceError for RewardError {
    fn transient(&self) -> bool {
        self.is_transient()
    }

    fn to_rpc(&self) -> RpcError {
        match self {
            RewardError::UserNotFound(user_id) => RpcError::user_not_found(user_id),
            RewardError::InvalidAmount(_) => RpcError::invalid_params(&self.to_string()),
            RewardError::Ledger(e) => e.to_rpc(),
            other => RpcError::internal_error(&other.to_string()),
        }
    }
}

impl ServiceError for InviteError {
    fn transient(&self) -> bool {
        self.is_transient()
    }

    fn to_rpc(&self) -> RpcError {
        match self {
            InviteError::CodeNotFound(code) => RpcError::code_not_found(code),
            InviteError::CodeExpired(code) => RpcError::code_expired(code),
            InviteError::InvalidTrigger(detail) => RpcError::invalid_trigger(detail),
            InviteError::Reward(e) => e.to_rpc(),
            other => RpcError::internal_error(&other.to_string()),
        }
    }
}

impl ServiceError for RedeemError {
    fn transient(&self) -> bool {
        self.is_transient()
    }

    fn to_rpc(&self) -> RpcError {
        match self {
            RedeemError::CodeNotFound(code) => RpcError::code_not_found(code),
            RedeemError::CodeExpired(code) => RpcError::code_expired(code),
            RedeemError::CodeAlreadyUsed(code) => RpcError::code_already_used(code),
            RedeemError::InvalidCode(detail) => RpcError::invalid_params(detail),
            RedeemError::UserNotFound(user_id) => RpcError::user_not_found(user_id),
            RedeemError::Reward(e) => e.to_rpc(),
            RedeemError::Membership(e) => e.to_rpc(),
            other => RpcError::internal_error(&other.to_string()),
        }
    }
}

/// The RPC server.
pub struct RpcServer {
    state: Arc<DaemonState>,
    socket_path: PathBuf,
}

impl RpcServer {
    /// Create a new RPC server.
    pub fn new(state: Arc<DaemonState>, socket_path: PathBuf) -> Self {
        Self { state, socket_path }
    }

    /// Run the server, accepting connections.
    pub async fn run(&self) -> anyhow::Result<()> {
        // Remove stale socket file
        let _ = std::fs::remove_file(&self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("IPC server listening on {:?}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(state, stream).await {
                            warn!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

/// Handle a single client connection.
async fn handle_connection(
    state: Arc<DaemonState>,
    stream: tokio::net::UnixStream,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            break; // EOF
        }
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => request,
            Err(_) => {
                let response = RpcResponse::error(serde_json::Value::Null, RpcError::parse_error());
                write_line(&mut writer, &response).await?;
                continue;
            }
        };

        if request.method == "subscribe_events" {
            return stream_events(state, request, reader, writer).await;
        }

        let response = dispatch_request(state.clone(), request).await;
        write_line(&mut writer, &response).await?;
    }

    Ok(())
}

/// Turn the connection into an event stream until the client hangs up.
async fn stream_events(
    state: Arc<DaemonState>,
    request: RpcRequest,
    mut reader: BufReader<OwnedReadHalf>,
    mut writer: OwnedWriteHalf,
) -> anyhow::Result<()> {
    let filter = match request.params.get("filter") {
        None | Some(serde_json::Value::Null) => EventFilter::default(),
        Some(raw) => match serde_json::from_value::<EventFilter>(raw.clone()) {
            Ok(filter) => filter,
            Err(e) => {
                let err = RpcError::invalid_params(&format!("filter: {e}"));
                write_line(&mut writer, &RpcResponse::error(request.id, err)).await?;
                return Ok(());
            }
        },
    };

    let mut events = state.event_bus.subscribe();
    let subscription_id = hex::encode(rand::random::<[u8; 8]>());
    let ack = RpcResponse::success(
        request.id,
        serde_json::json!({ "subscription_id": subscription_id }),
    );
    write_line(&mut writer, &ack).await?;
    info!(subscription_id = %subscription_id, "event subscription opened");

    // Input after subscribing is ignored; EOF ends the stream.
    let mut ignored = String::new();
    loop {
        tokio::select! {
            read = reader.read_line(&mut ignored) => {
                if read? == 0 {
                    break;
                }
                ignored.clear();
            }
            received = events.recv() => match received {
                Ok(event) if filter.matches(&event) => {
                    let notification = RpcNotification {
                        jsonrpc: "2.0",
                        method: "event",
                        params: NotificationParams {
                            subscription_id: &subscription_id,
                            event: &event,
                        },
                    };
                    write_line(&mut writer, &notification).await?;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    warn!(subscription_id = %subscription_id, missed, "subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    info!(subscription_id = %subscription_id, "event subscription closed");
    Ok(())
}

async fn write_line<W, T>(writer: &mut W, message: &T) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut json = serde_json::to_string(message)?;
    json.push('\n');
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Dispatch a JSON-RPC request to the appropriate command handler.
pub(crate) async fn dispatch_request(state: Arc<DaemonState>, request: RpcRequest) -> RpcResponse {
    let id = request.id.clone();
    let method = request.method.as_str();

    if request.jsonrpc != "2.0" {
        return RpcResponse::error(id, RpcError::invalid_request());
    }

    debug!("Dispatching RPC method: {}", method);

    let params = &request.params;
    let result = match method {
        // Ledger commands
        "open_account" => commands::ledger::open_account(&state, params).await,
        "get_balance" => commands::ledger::get_balance(&state, params).await,
        "get_transactions" => commands::ledger::get_transactions(&state, params).await,
        "apply_transaction" => commands::ledger::apply_transaction(&state, params).await,
        "refund" => commands::ledger::refund(&state, params).await,
        "reconcile" => commands::ledger::reconcile(&state, params).await,

        // Membership commands
        "get_membership" => commands::membership::get_membership(&state, params).await,
        "purchase_membership" => {
            commands::membership::purchase_membership(&state, params).await
        }
        "reset_daily_allowance" => {
            commands::membership::reset_daily_allowance(&state, params).await
        }
        "batch_reset_all" => commands::membership::batch_reset_all(&state).await,

        // Invitation commands
        "create_invite_code" => commands::invite::create_invite_code(&state, params).await,
        "deactivate_invite_code" => {
            commands::invite::deactivate_invite_code(&state, params).await
        }
        "record_invitee" => commands::invite::record_invitee(&state, params).await,
        "get_invite_stats" => commands::invite::get_invite_stats(&state, params).await,
        "reconcile_rewards" => commands::invite::reconcile_rewards(&state).await,

        // Redemption commands
        "redeem_code" => commands::redeem::redeem_code(&state, params).await,
        "create_redemption_codes" => {
            commands::redeem::create_redemption_codes(&state, params).await
        }

        // Diagnostics
        "get_daemon_status" => commands::diagnostics::get_daemon_status(&state).await,

        _ => Err(RpcError::method_not_found(method)),
    };

    match result {
        Ok(value) => RpcResponse::success(id, value),
        Err(err) => RpcResponse::error(id, err),
    }
}
