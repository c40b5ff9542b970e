//! Local control-plane IPC.
//!
//! A Unix domain socket (Windows support is a stub — named pipes would need
//! an extra dependency the teacher's stack doesn't carry) accepting
//! newline-delimited JSON commands and replying with newline-delimited JSON
//! responses. Used by operational tooling to introspect and control a
//! running conductor without restarting it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::child_manager::{ChildManager, ChildStatus, ProcessKind};
use crate::health_checker::HealthChecker;
use crate::message_bus::MessageBus;

pub struct IpcContext {
    pub child_mgr: Arc<ChildManager>,
    pub health_checker: Arc<HealthChecker>,
    pub message_bus: Arc<MessageBus>,
    pub shutdown_tx: mpsc::Sender<()>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
enum IpcCommand {
    Status,
    RestartServer,
    DrainAndShutdown,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum IpcResponse {
    Status { children: Vec<ChildStatus>, circuit: String },
    Ok,
    Error { message: String },
}

pub async fn run_ipc_server(path: String, max_clients: usize, ctx: Arc<IpcContext>, cancel: CancellationToken) {
    #[cfg(unix)]
    {
        run_unix(path, max_clients, ctx, cancel).await;
    }
    #[cfg(windows)]
    {
        warn!(path, "IPC server is not implemented on this platform — control-plane commands are unavailable");
        cancel.cancelled().await;
    }
}

#[cfg(unix)]
async fn run_unix(path: String, max_clients: usize, ctx: Arc<IpcContext>, cancel: CancellationToken) {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let _ = std::fs::remove_file(&path);
    let listener = match tokio::net::UnixListener::bind(&path) {
        Ok(l) => l,
        Err(e) => {
            error!(path, error = %e, "failed to bind IPC socket");
            return;
        }
    };
    info!(path, "IPC server listening");
    let permits = Arc::new(Semaphore::new(max_clients));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("IPC server shutting down");
                let _ = std::fs::remove_file(&path);
                return;
            }
            accepted = listener.accept() => {
                let Ok((stream, _)) = accepted else { continue };
                let Ok(permit) = permits.clone().try_acquire_owned() else {
                    warn!("IPC client limit reached, dropping connection");
                    continue;
                };
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    let (reader, mut writer) = stream.into_split();
                    let mut lines = BufReader::new(reader).lines();

                    while let Ok(Some(line)) = lines.next_line().await {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let response = match serde_json::from_str::<IpcCommand>(&line) {
                            Ok(cmd) => dispatch(cmd, &ctx).await,
                            Err(e) => IpcResponse::Error { message: format!("invalid command: {e}") },
                        };
                        let Ok(mut payload) = serde_json::to_vec(&response) else { break };
                        payload.push(b'\n');
                        if writer.write_all(&payload).await.is_err() {
                            break;
                        }
                    }
                });
            }
        }
    }
}

#[cfg(unix)]
async fn dispatch(cmd: IpcCommand, ctx: &IpcContext) -> IpcResponse {
    match cmd {
        IpcCommand::Status => {
            let children = ctx.child_mgr.status().await;
            let circuit = format!("{:?}", ctx.health_checker.circuit_state());
            IpcResponse::Status { children, circuit }
        }
        IpcCommand::RestartServer => match ctx.child_mgr.restart(ProcessKind::BridgeServer).await {
            Ok(_) => IpcResponse::Ok,
            Err(e) => IpcResponse::Error { message: e.to_string() },
        },
        IpcCommand::DrainAndShutdown => {
            let _ = ctx.shutdown_tx.send(()).await;
            IpcResponse::Ok
        }
    }
}
