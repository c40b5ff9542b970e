//! Configuration for the conductor daemon.
//!
//! Domain settings (webhook URLs, workflow groups, the supervisor's active
//! window) are the same `AppConfig` the server and CLI load, so the three
//! binaries never disagree about which workflows belong to which group.
//! Conductor-only settings (the child process to supervise, the IPC socket,
//! log rotation, the state file) live alongside it here.

use std::path::PathBuf;
use std::time::Duration;

use bridge_core::config::AppConfig;
use serde::{Deserialize, Serialize};

const ENV_PREFIX: &str = "BRIDGE_CONDUCTOR_";

/// Top-level conductor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConductorConfig {
    /// Shared domain configuration (workflows, http, supervisor window, ...).
    pub app: AppConfig,
    pub health: HealthCheckConfig,
    pub ipc: IpcConfig,
    pub process: ProcessConfig,
    pub store: StoreConfig,
    pub log: LogConfig,
}

/// Health-check configuration for the locally supervised server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub failure_threshold: u32,
    pub url: String,
}

/// IPC server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcConfig {
    /// Path for the Unix domain socket (Linux/macOS) or named pipe (Windows).
    pub path: String,
    pub max_clients: usize,
}

/// Supervised child-process configuration. The only managed child is the
/// local `bridge-server`; interactive launcher front-ends are out of scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub server_binary: PathBuf,
    pub server_args: Vec<String>,
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
    pub max_restarts: u32,
    #[serde(with = "humantime_serde")]
    pub restart_window: Duration,
}

/// JSON-file state store configuration. A single locked file is plenty for
/// the handful of child-process/agent records the conductor tracks — a
/// SQLite dependency would buy nothing here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub state_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub dir: PathBuf,
    pub max_file_size: u64,
    pub max_files: usize,
}

mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            app: AppConfig::default(),
            health: HealthCheckConfig::default(),
            ipc: IpcConfig::default(),
            process: ProcessConfig::default(),
            store: StoreConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            timeout: Duration::from_secs(5),
            failure_threshold: 3,
            url: "http://127.0.0.1:8000/api/health".to_string(),
        }
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            path: default_ipc_path(),
            max_clients: 8,
        }
    }
}

#[cfg(windows)]
fn default_ipc_path() -> String {
    r"\\.\pipe\bridge-conductor".to_string()
}

#[cfg(unix)]
fn default_ipc_path() -> String {
    let dir = dirs::runtime_dir()
        .or_else(dirs::state_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"));
    dir.join("bridge-conductor.sock").to_string_lossy().to_string()
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            server_binary: default_server_binary(),
            server_args: vec![],
            shutdown_grace: Duration::from_secs(10),
            max_restarts: 5,
            restart_window: Duration::from_secs(300),
        }
    }
}

fn default_server_binary() -> PathBuf {
    if let Ok(exe) = std::env::current_exe() {
        let dir = exe.parent().unwrap_or_else(|| std::path::Path::new("."));
        let candidate = if cfg!(windows) {
            dir.join("bridge-server.exe")
        } else {
            dir.join("bridge-server")
        };
        if candidate.exists() {
            return candidate;
        }
    }
    PathBuf::from(if cfg!(windows) { "bridge-server.exe" } else { "bridge-server" })
}

fn state_dir() -> PathBuf {
    dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")).join("bridge-conductor")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_path: state_dir().join("state.json"),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: state_dir().join("logs"),
            max_file_size: 10 * 1024 * 1024,
            max_files: 5,
        }
    }
}

impl ConductorConfig {
    /// Load config, applying `BRIDGE_CONDUCTOR_`-prefixed environment
    /// overrides on top of defaults. The shared `AppConfig` section loads
    /// its own `BRIDGE_`-prefixed overrides independently.
    pub fn load() -> Self {
        let mut cfg = Self {
            app: AppConfig::load(),
            ..Self::default()
        };

        if let Ok(v) = std::env::var(format!("{}HEALTH_INTERVAL_MS", ENV_PREFIX)) {
            if let Ok(ms) = v.parse::<u64>() {
                cfg.health.interval = Duration::from_millis(ms);
            }
        }
        if let Ok(v) = std::env::var(format!("{}HEALTH_URL", ENV_PREFIX)) {
            cfg.health.url = v;
        }
        if let Ok(v) = std::env::var(format!("{}IPC_PATH", ENV_PREFIX)) {
            cfg.ipc.path = v;
        }
        if let Ok(v) = std::env::var(format!("{}SERVER_BINARY", ENV_PREFIX)) {
            cfg.process.server_binary = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var(format!("{}STATE_PATH", ENV_PREFIX)) {
            cfg.store.state_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var(format!("{}LOG_DIR", ENV_PREFIX)) {
            cfg.log.dir = PathBuf::from(v);
        }

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = ConductorConfig::default();
        assert_eq!(cfg.health.failure_threshold, 3);
        assert_eq!(cfg.process.max_restarts, 5);
        assert!(cfg.ipc.max_clients > 0);
    }
}
