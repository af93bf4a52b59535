//! tallyd: the points ledger daemon.
//!
//! Single OS process running a Tokio async runtime. Product services call
//! the ledger via JSON-RPC over a Unix socket; blocking SQLite work runs on
//! pooled connections in Tokio's blocking pool.

mod commands;
mod config;
mod events;
mod rpc;
mod scheduler;

use std::sync::Arc;

use tally_db::pool::Pool;
use tally_types::events::EventType;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::config::TallyConfig;
use crate::events::EventBus;
use crate::rpc::RpcServer;

/// Daemon-wide shared state.
pub struct DaemonState {
    /// Connection pool over the ledger database.
    pub pool: Arc<Pool>,
    /// Configuration.
    pub config: TallyConfig,
    /// Event bus for pushing events to subscribers.
    pub event_bus: EventBus,
    /// Identifies this process in job leases.
    pub holder: String,
    /// Unix time the daemon started.
    pub started_at: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config
    let config = TallyConfig::load()?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("tally={}", config.advanced.log_level).parse()?),
        )
        .init();

    info!("Tally daemon starting");

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    // 2. Open database pool and sync milestone config
    let db_path = data_dir.join("tally.db");
    let pool = Pool::open(&db_path, config.storage.pool_size)?;
    {
        let mut conn = pool.get()?;
        config.invite.sync_milestones(&mut *conn)?;
    }

    // 3. Create event bus
    let event_bus = EventBus::new(1000);

    // 4. Create shutdown channel for background tasks
    let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);

    // 5. Build daemon state
    let started_at = tally_types::now_secs();
    let holder = format!(
        "tallyd-{}-{}",
        std::process::id(),
        hex::encode(rand::random::<[u8; 4]>())
    );
    let state = Arc::new(DaemonState {
        pool,
        config,
        event_bus,
        holder,
        started_at,
    });

    // 6. Start the daily scheduler
    if state.config.scheduler.enabled {
        tokio::spawn(scheduler::run(state.clone(), shutdown_tx.subscribe()));
    }

    // 7. Start IPC server
    let socket_path = data_dir.join("tally.sock");
    let rpc_server = RpcServer::new(state.clone(), socket_path.clone());

    info!("Starting JSON-RPC server on {:?}", socket_path);

    // 8. Emit DaemonStarted event
    state.event_bus.emit(events::event(
        EventType::DaemonStarted,
        started_at,
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "instance": state.holder,
        }),
    ));

    // 9. Run the RPC server until shutdown
    let mut shutdown_rx = shutdown_tx.subscribe();
    tokio::select! {
        result = rpc_server.run() => {
            if let Err(e) = result {
                error!("RPC server error: {}", e);
            }
        }
        _ = shutdown_rx.recv() => {
            info!("Shutdown signal received");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
        }
    }

    // Stop background tasks
    let _ = shutdown_tx.send(());

    // Clean up socket file
    let _ = std::fs::remove_file(&socket_path);

    info!("Daemon stopped");
    Ok(())
}
