//! Supervisor loop — periodic health checks and file-watcher triggers.
//!
//! Single-threaded scheduler on a configurable tick (default 5 minutes).
//! Each tick: conditionally pings the automation provider, always pings the
//! local HTTP server, diffs the watched portfolio file for newly opened
//! positions (triggering the domain subprocess with `--force`), and once a
//! day triggers the same subprocess without force after the configured
//! recalibration time.

use std::collections::HashSet;
use std::process::Stdio;
use std::sync::Mutex;

use chrono::{Datelike, Local, NaiveDate, Timelike};
use serde::Deserialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use bridge_core::config::SupervisorConfig;

#[derive(Debug, Deserialize)]
struct Position {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize, Default)]
struct PortfolioFile {
    #[serde(default)]
    positions: Vec<Position>,
}

pub struct SupervisorLoop {
    config: SupervisorConfig,
    client: reqwest::Client,
    n8n_base_url: String,
    n8n_api_key: String,
    known_open_ids: Mutex<HashSet<String>>,
    last_recalibration: Mutex<Option<NaiveDate>>,
}

impl SupervisorLoop {
    pub fn new(config: SupervisorConfig, n8n_base_url: String, n8n_api_key: String) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            n8n_base_url,
            n8n_api_key,
            known_open_ids: Mutex::new(HashSet::new()),
            last_recalibration: Mutex::new(None),
        }
    }

    /// Run the supervisor loop until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(tick_secs = self.config.tick_interval.as_secs(), "supervisor loop started");

        // Seed known positions and force-trigger an initial run, mirroring
        // the startup entry-condition capture in the original.
        let seed = self.open_position_ids().await;
        *self.known_open_ids.lock().unwrap() = seed;
        self.trigger_subprocess(true).await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("supervisor loop shutting down");
                    return;
                }
                _ = tokio::time::sleep(self.config.tick_interval) => {
                    self.tick().await;
                }
            }
        }
    }

    async fn tick(&self) {
        let now = Local::now();

        if self.in_active_window(&now) {
            self.check_automation_provider().await;
        } else {
            debug!("outside active window — skipping automation provider ping");
        }

        self.check_local_health().await;
        self.check_open_positions().await;
        self.maybe_daily_recalibration(&now).await;
    }

    fn in_active_window(&self, now: &chrono::DateTime<Local>) -> bool {
        let weekday = now.weekday().num_days_from_monday() as u8;
        self.config.active_window.active_weekdays.contains(&weekday)
            && now.hour() as u8 >= self.config.active_window.start_hour
            && (now.hour() as u8) < self.config.active_window.end_hour
    }

    async fn check_automation_provider(&self) {
        let url = format!("{}/api/v1/workflows", self.n8n_base_url.trim_end_matches('/'));
        match self.client.get(&url).header("X-N8N-API-KEY", &self.n8n_api_key).send().await {
            Ok(resp) if resp.status().is_success() => info!("automation provider: online"),
            Ok(resp) => warn!(status = resp.status().as_u16(), "automation provider: unhealthy"),
            Err(e) => error!(error = %e, "automation provider: unreachable"),
        }
    }

    async fn check_local_health(&self) {
        match self.client.get(&self.config.local_health_url).send().await {
            Ok(resp) if resp.status().is_success() => info!("local server: responding"),
            Ok(resp) => warn!(status = resp.status().as_u16(), "local server: unhealthy"),
            Err(_) => error!("local server: down"),
        }
    }

    async fn open_position_ids(&self) -> HashSet<String> {
        let Ok(bytes) = tokio::fs::read(&self.config.portfolio_path).await else {
            return HashSet::new();
        };
        let Ok(file) = serde_json::from_slice::<PortfolioFile>(&bytes) else {
            return HashSet::new();
        };
        file.positions.into_iter().filter(|p| p.status == "OPEN").map(|p| p.id).collect()
    }

    async fn check_open_positions(&self) {
        let current = self.open_position_ids().await;
        let new_ids: Vec<String> = {
            let known = self.known_open_ids.lock().unwrap();
            current.difference(&known).cloned().collect()
        };

        if !new_ids.is_empty() {
            info!(?new_ids, "new open position(s) detected — triggering subprocess");
            self.trigger_subprocess(true).await;
        }
        *self.known_open_ids.lock().unwrap() = current;
    }

    async fn maybe_daily_recalibration(&self, now: &chrono::DateTime<Local>) {
        let today = now.date_naive();
        let past_recalibration_time = now.hour() as u8 > self.config.daily_recalibration_hour
            || (now.hour() as u8 == self.config.daily_recalibration_hour
                && now.minute() as u8 >= self.config.daily_recalibration_minute);

        if !past_recalibration_time {
            return;
        }

        let already_ran_today = *self.last_recalibration.lock().unwrap() == Some(today);
        if already_ran_today {
            return;
        }

        info!("daily recalibration window reached — triggering subprocess");
        self.trigger_subprocess(false).await;
        *self.last_recalibration.lock().unwrap() = Some(today);
    }

    /// Run the configured domain subprocess with a hard timeout. A timeout
    /// is a warning, not a failure — the next tick tries again.
    async fn trigger_subprocess(&self, force: bool) {
        let Some((program, rest)) = self.config.subprocess_command.split_first() else {
            debug!("no subprocess command configured — skipping trigger");
            return;
        };

        let mut cmd = Command::new(program);
        cmd.args(rest);
        if force {
            cmd.arg("--force");
        }
        cmd.stdout(Stdio::null()).stderr(Stdio::null());

        match tokio::time::timeout(self.config.subprocess_timeout, cmd.status()).await {
            Ok(Ok(status)) => info!(?status, force, "supervisor subprocess completed"),
            Ok(Err(e)) => error!(error = %e, "failed to spawn supervisor subprocess"),
            Err(_) => warn!(
                timeout_secs = self.config.subprocess_timeout.as_secs(),
                "supervisor subprocess timed out — treated as a warning, not a failure"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn base_config(portfolio_path: std::path::PathBuf) -> SupervisorConfig {
        let mut supervisor = bridge_core::config::AppConfig::default().supervisor;
        supervisor.portfolio_path = portfolio_path;
        supervisor.tick_interval = Duration::from_millis(10);
        supervisor
    }

    #[tokio::test]
    async fn open_position_ids_reads_only_open_status() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portfolio.json");
        tokio::fs::write(
            &path,
            r#"{"positions":[{"id":"a","status":"OPEN"},{"id":"b","status":"CLOSED"}]}"#,
        )
        .await
        .unwrap();

        let config = base_config(path);
        let loop_ = SupervisorLoop::new(config, "http://example.invalid".into(), String::new());
        let ids = loop_.open_position_ids().await;
        assert_eq!(ids, HashSet::from(["a".to_string()]));
    }

    #[tokio::test]
    async fn missing_portfolio_file_yields_empty_set() {
        let config = base_config(std::path::PathBuf::from("/nonexistent/portfolio.json"));
        let loop_ = SupervisorLoop::new(config, "http://example.invalid".into(), String::new());
        assert!(loop_.open_position_ids().await.is_empty());
    }
}
