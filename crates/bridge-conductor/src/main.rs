//! Bridge Conductor — lifecycle manager and supervisor loop daemon.
//!
//! Manages the lifecycle of the local `bridge-server` process, activates and
//! deactivates the configured remote n8n workflow group on start/shutdown,
//! health-checks the local server with a circuit-breaker restart policy, and
//! runs the supervisor loop's periodic checks and file-watcher triggers.
//!
//! This is the one process that never gets rebuilt by the agent. It
//! survives everything.

mod child_manager;
mod config;
mod health_checker;
mod ipc_server;
mod lifecycle;
mod log_manager;
mod message_bus;
mod state_store;
mod supervisor;

use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info};

use child_manager::{ChildManager, ProcessKind};
use config::ConductorConfig;
use health_checker::HealthChecker;
use ipc_server::{run_ipc_server, IpcContext};
use lifecycle::{LifecycleManager, WorkflowGroup};
use log_manager::LogManager;
use message_bus::MessageBus;
use state_store::StateStore;
use supervisor::SupervisorLoop;

#[derive(Parser, Debug)]
#[command(name = "bridge-conductor", about = "Lifecycle manager and supervisor loop for the Agent Bridge runtime")]
struct Args {
    /// Which workflow group to activate on start and deactivate on shutdown.
    #[arg(long, value_enum, default_value = "all")]
    workflow_group: WorkflowGroupArg,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum WorkflowGroupArg {
    Alpha,
    Meta,
    All,
}

impl From<WorkflowGroupArg> for WorkflowGroup {
    fn from(v: WorkflowGroupArg) -> Self {
        match v {
            WorkflowGroupArg::Alpha => WorkflowGroup::Alpha,
            WorkflowGroupArg::Meta => WorkflowGroup::Meta,
            WorkflowGroupArg::All => WorkflowGroup::All,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // ---- 1. Load configuration ----
    let config = ConductorConfig::load();

    // ---- 2. Initialise logging ----
    let _log_guard = LogManager::init(&config.log)?;
    log_manager::prune_old_logs(&config.log.dir, config.log.max_files);

    info!(version = env!("CARGO_PKG_VERSION"), "bridge-conductor starting");

    // ---- 3. Open state store ----
    let store = Arc::new(StateStore::open(&config.store).await?);
    info!("state store opened");

    // ---- 4. Create subsystems ----
    let child_mgr = Arc::new(ChildManager::new(config.process.clone(), store.clone()));
    let health_checker = Arc::new(HealthChecker::new(config.health.clone(), child_mgr.clone(), store.clone()));
    let message_bus = Arc::new(MessageBus::new(store.clone()));

    let n8n_api_key = std::env::var("N8N_API_KEY").unwrap_or_default();
    let lifecycle = Arc::new(LifecycleManager::new(&config.app, args.workflow_group.into(), n8n_api_key.clone()));
    let supervisor_loop = Arc::new(SupervisorLoop::new(
        config.app.supervisor.clone(),
        config.app.http.base_url.clone(),
        n8n_api_key,
    ));

    // ---- 5. Activate the configured workflow group ----
    let failures = lifecycle.activate_all().await;
    if failures > 0 {
        error!(failures, group = lifecycle.group().as_str(), "some workflows failed to activate");
    }
    lifecycle.register_shutdown_hook();

    // ---- 6. Install a panic hook that guarantees deactivation ----
    {
        let lifecycle = lifecycle.clone();
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if lifecycle.register_shutdown_hook() {
                error!("unhandled panic — deactivating workflows before unwinding");
                lifecycle.deactivate_all_blocking();
            }
            previous(info);
        }));
    }

    // ---- 7. Start bridge-server ----
    match child_mgr.start(ProcessKind::BridgeServer).await {
        Ok(pid) => {
            info!(pid, "bridge-server started");
            message_bus.mark_online("bridge-server").await;
        }
        Err(e) => {
            error!(error = %e, "failed to start bridge-server — will keep trying via health checker");
        }
    }

    // ---- 8. Set up shutdown coordination ----
    let cancel = tokio_util::sync::CancellationToken::new();
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    // ---- 9. Start health checker ----
    let health_cancel = cancel.clone();
    let health_ref = health_checker.clone();
    tokio::spawn(async move {
        health_ref.run(health_cancel).await;
    });

    // ---- 10. Start supervisor loop ----
    let supervisor_cancel = cancel.clone();
    let supervisor_ref = supervisor_loop.clone();
    tokio::spawn(async move {
        supervisor_ref.run(supervisor_cancel).await;
    });

    // ---- 11. Start IPC server ----
    let ipc_ctx = Arc::new(IpcContext {
        child_mgr: child_mgr.clone(),
        health_checker: health_checker.clone(),
        message_bus: message_bus.clone(),
        shutdown_tx,
    });
    let ipc_cancel = cancel.clone();
    let ipc_path = config.ipc.path.clone();
    let ipc_max_clients = config.ipc.max_clients;
    tokio::spawn(async move {
        run_ipc_server(ipc_path, ipc_max_clients, ipc_ctx, ipc_cancel).await;
    });

    info!("bridge-conductor fully initialised — waiting for signals");

    // ---- 12. Wait for shutdown ----
    tokio::select! {
        _ = signal_shutdown() => {
            info!("received OS shutdown signal");
        }
        _ = shutdown_rx.recv() => {
            info!("received IPC shutdown command");
        }
    }

    // ---- 13. Graceful shutdown ----
    info!("initiating graceful shutdown");
    cancel.cancel();

    if let Err(e) = child_mgr.stop_all().await {
        error!(error = %e, "error stopping children during shutdown");
    }

    if lifecycle.register_shutdown_hook() {
        let failures = lifecycle.deactivate_all().await;
        if failures > 0 {
            error!(failures, group = lifecycle.group().as_str(), "some workflows failed to deactivate");
        }
    }

    info!("bridge-conductor exited cleanly");
    Ok(())
}

/// Wait for an OS shutdown signal.
async fn signal_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT");
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(windows)]
    {
        tokio::signal::ctrl_c().await.expect("failed to register Ctrl+C handler");
    }
}
