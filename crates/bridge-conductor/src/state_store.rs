//! Agent/child-process state persistence.
//!
//! A single JSON file guarded by an in-process mutex, replacing the
//! original's SQLite table — the conductor tracks a handful of records
//! (one per managed child), far too little state to justify a database.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::StoreConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub name: String,
    pub status: String,
    pub pid: Option<u32>,
    pub last_health_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    agents: HashMap<String, AgentState>,
}

pub struct StateStore {
    path: PathBuf,
    inner: Mutex<StoreFile>,
}

impl StateStore {
    /// Open (or create) the state file.
    pub async fn open(config: &StoreConfig) -> anyhow::Result<Self> {
        if let Some(parent) = config.state_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = match tokio::fs::read(&config.state_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => StoreFile::default(),
        };

        Ok(Self {
            path: config.state_path.clone(),
            inner: Mutex::new(file),
        })
    }

    /// Record a status/pid transition for a managed process.
    pub async fn upsert_agent_state(&self, name: &str, status: &str, pid: Option<u32>) -> anyhow::Result<()> {
        let mut guard = self.inner.lock().await;
        let now = Utc::now();
        let entry = guard.agents.entry(name.to_string()).or_insert_with(|| AgentState {
            name: name.to_string(),
            status: status.to_string(),
            pid,
            last_health_at: None,
            updated_at: now,
        });
        entry.status = status.to_string();
        entry.pid = pid;
        entry.updated_at = now;
        Self::flush(&self.path, &guard).await
    }

    /// Record that a health check against `name` just succeeded.
    pub async fn record_health(&self, name: &str) -> anyhow::Result<()> {
        let mut guard = self.inner.lock().await;
        let now = Utc::now();
        guard
            .agents
            .entry(name.to_string())
            .or_insert_with(|| AgentState {
                name: name.to_string(),
                status: "unknown".to_string(),
                pid: None,
                last_health_at: None,
                updated_at: now,
            })
            .last_health_at = Some(now);
        Self::flush(&self.path, &guard).await
    }

    /// Current snapshot of all tracked agent states.
    pub async fn agent_states(&self) -> Vec<AgentState> {
        self.inner.lock().await.agents.values().cloned().collect()
    }

    async fn flush(path: &PathBuf, file: &StoreFile) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(file)?;
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_and_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            state_path: dir.path().join("state.json"),
        };
        let store = StateStore::open(&config).await.unwrap();
        store.upsert_agent_state("bridge-server", "running", Some(123)).await.unwrap();
        store.record_health("bridge-server").await.unwrap();

        let states = store.agent_states().await;
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].status, "running");
        assert_eq!(states[0].pid, Some(123));
        assert!(states[0].last_health_at.is_some());

        // Re-open and confirm the file persisted.
        let reopened = StateStore::open(&config).await.unwrap();
        assert_eq!(reopened.agent_states().await.len(), 1);
    }
}
