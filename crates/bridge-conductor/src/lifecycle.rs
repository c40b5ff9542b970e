//! Remote workflow lifecycle management.
//!
//! Activates every workflow in a named group on startup and guarantees a
//! deactivate POST is attempted for each one on shutdown — normal exit,
//! SIGINT/SIGTERM, or an unhandled panic. Registration is idempotent: only
//! the first call installs the shutdown path, matching the "at most one set
//! of hooks per process" requirement.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bridge_core::config::{AppConfig, WorkflowEntry};
use tracing::{error, info, warn};

const ACTIVATION_SPACING: Duration = Duration::from_millis(300);

/// A named group of workflows, mirroring the original's `alpha`/`meta`/`all`
/// app groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowGroup {
    Alpha,
    Meta,
    All,
}

impl WorkflowGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowGroup::Alpha => "alpha",
            WorkflowGroup::Meta => "meta",
            WorkflowGroup::All => "all",
        }
    }

    fn entries(&self, config: &AppConfig) -> Vec<WorkflowEntry> {
        match self {
            WorkflowGroup::Alpha => config.workflows.alpha.clone(),
            WorkflowGroup::Meta => config.workflows.meta.clone(),
            WorkflowGroup::All => config
                .workflows
                .alpha
                .iter()
                .chain(config.workflows.meta.iter())
                .cloned()
                .collect(),
        }
    }
}

pub struct LifecycleManager {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    workflows: Vec<WorkflowEntry>,
    group: WorkflowGroup,
    registered: AtomicBool,
}

impl LifecycleManager {
    pub fn new(config: &AppConfig, group: WorkflowGroup, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.http.base_url.clone(),
            api_key,
            workflows: group.entries(config),
            group,
            registered: AtomicBool::new(false),
        }
    }

    pub fn group(&self) -> WorkflowGroup {
        self.group
    }

    /// POST activate on each workflow, sequentially, spaced 300ms apart.
    /// Returns the number of workflows that failed to toggle.
    pub async fn activate_all(&self) -> usize {
        self.toggle_all("activate").await
    }

    /// POST deactivate on each workflow.
    pub async fn deactivate_all(&self) -> usize {
        self.toggle_all("deactivate").await
    }

    async fn toggle_all(&self, action: &str) -> usize {
        let mut failures = 0;
        for (i, wf) in self.workflows.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(ACTIVATION_SPACING).await;
            }
            let url = format!("{}/api/v1/workflows/{}/{}", self.base_url.trim_end_matches('/'), wf.id, action);
            match self.client.post(&url).header("X-N8N-API-KEY", &self.api_key).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(workflow = %wf.name, action, "workflow lifecycle toggle succeeded");
                }
                Ok(resp) => {
                    warn!(workflow = %wf.name, status = resp.status().as_u16(), action, "workflow lifecycle toggle returned non-success");
                    failures += 1;
                }
                Err(e) => {
                    error!(workflow = %wf.name, error = %e, action, "workflow lifecycle toggle failed");
                    failures += 1;
                }
            }
        }
        failures
    }

    /// Mark the shutdown hook as installed. Returns `true` the first time
    /// it's called in this process, `false` on every subsequent call — the
    /// caller should only actually run the deactivate path on `true`.
    pub fn register_shutdown_hook(&self) -> bool {
        let first = !self.registered.swap(true, Ordering::SeqCst);
        if first {
            info!(group = self.group.as_str(), "shutdown hook registered");
        }
        first
    }

    /// Synchronous, blocking variant of `deactivate_all` for use from a
    /// panic hook, where no async runtime is available.
    pub fn deactivate_all_blocking(&self) {
        let client = match reqwest::blocking::Client::builder().timeout(Duration::from_secs(10)).build() {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "failed to build blocking HTTP client for panic-path deactivation");
                return;
            }
        };
        for wf in &self.workflows {
            let url = format!("{}/api/v1/workflows/{}/deactivate", self.base_url.trim_end_matches('/'), wf.id);
            if let Err(e) = client.post(&url).header("X-N8N-API-KEY", &self.api_key).send() {
                error!(workflow = %wf.name, error = %e, "panic-path deactivation failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_core::config::WorkflowEntry;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_with(base_url: String) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.http.base_url = base_url;
        cfg.workflows.alpha = vec![
            WorkflowEntry { id: "wf1".into(), name: "Alpha One".into() },
            WorkflowEntry { id: "wf2".into(), name: "Alpha Two".into() },
        ];
        cfg
    }

    #[tokio::test]
    async fn activate_all_posts_each_workflow() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/workflows/wf1/activate"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/workflows/wf2/activate"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let cfg = config_with(server.uri());
        let mgr = LifecycleManager::new(&cfg, WorkflowGroup::Alpha, "key".into());
        let failures = mgr.activate_all().await;
        assert_eq!(failures, 0);
    }

    #[tokio::test]
    async fn failed_toggle_is_counted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/workflows/wf1/deactivate"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/workflows/wf2/deactivate"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let cfg = config_with(server.uri());
        let mgr = LifecycleManager::new(&cfg, WorkflowGroup::Alpha, "key".into());
        let failures = mgr.deactivate_all().await;
        assert_eq!(failures, 1);
    }

    #[test]
    fn register_shutdown_hook_is_idempotent() {
        let cfg = config_with("http://example.invalid".into());
        let mgr = LifecycleManager::new(&cfg, WorkflowGroup::All, "key".into());
        assert!(mgr.register_shutdown_hook());
        assert!(!mgr.register_shutdown_hook());
        assert!(!mgr.register_shutdown_hook());
    }
}
