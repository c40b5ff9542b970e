//! Healing Protocol (§4.8): Sentry Level 2 infrastructure repair. When the
//! Dispatcher hits a connection-class failure it asks this module to scan
//! for a live workflow and, if one matches, swap the Dispatcher's active
//! webhook URL in place so the next attempt targets a working endpoint.

use tokio::sync::RwLock;

/// One workflow as reported by the orchestration platform's workflow list
/// API (n8n in the original).
#[derive(Debug, Clone)]
pub struct WorkflowSummary {
    pub id: String,
    pub name: String,
    pub active: bool,
}

/// Abstracts the workflow-listing call so the Dispatcher and its tests don't
/// depend on a concrete HTTP client.
#[async_trait::async_trait]
pub trait WorkflowLister: Send + Sync {
    async fn list_workflows(&self) -> anyhow::Result<Vec<WorkflowSummary>>;
}

/// Find the first active workflow whose name contains one of `brand_tokens`
/// and rewrite `webhook_url` to target it. Returns whether a healing target
/// was found and applied.
pub async fn run_healing_protocol<L: WorkflowLister>(
    lister: &L,
    brand_tokens: &[&str],
    base_url: &str,
    webhook_url: &RwLock<String>,
) -> bool {
    let Ok(workflows) = lister.list_workflows().await else {
        return false;
    };

    let target = workflows
        .iter()
        .find(|wf| wf.active && brand_tokens.iter().any(|token| wf.name.contains(token)));

    match target {
        Some(wf) => {
            let new_url = format!("{}/webhook/{}/elite-council", base_url.trim_end_matches('/'), wf.id);
            let mut guard = webhook_url.write().await;
            *guard = new_url;
            true
        }
        None => false,
    }
}

/// Production `WorkflowLister` backed by the orchestration platform's REST
/// API (n8n in the original), authenticating with `X-N8N-API-KEY`.
pub struct N8nWorkflowLister {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl N8nWorkflowLister {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("failed to build n8n HTTP client"),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait::async_trait]
impl WorkflowLister for N8nWorkflowLister {
    async fn list_workflows(&self) -> anyhow::Result<Vec<WorkflowSummary>> {
        let url = format!("{}/api/v1/workflows", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .get(&url)
            .header("X-N8N-API-KEY", &self.api_key)
            .send()
            .await?
            .error_for_status()?;
        let body: serde_json::Value = resp.json().await?;
        let workflows = body
            .get("data")
            .and_then(|d| d.as_array())
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|wf| {
                Some(WorkflowSummary {
                    id: wf.get("id")?.as_str()?.to_string(),
                    name: wf.get("name")?.as_str()?.to_string(),
                    active: wf.get("active").and_then(|a| a.as_bool()).unwrap_or(false),
                })
            })
            .collect();
        Ok(workflows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedWorkflows(Vec<WorkflowSummary>);

    #[async_trait::async_trait]
    impl WorkflowLister for FixedWorkflows {
        async fn list_workflows(&self) -> anyhow::Result<Vec<WorkflowSummary>> {
            Ok(self.0.clone())
        }
    }

    struct FailingLister;

    #[async_trait::async_trait]
    impl WorkflowLister for FailingLister {
        async fn list_workflows(&self) -> anyhow::Result<Vec<WorkflowSummary>> {
            anyhow::bail!("n8n unreachable")
        }
    }

    #[tokio::test]
    async fn heals_to_first_active_matching_brand_token() {
        let lister = FixedWorkflows(vec![
            WorkflowSummary {
                id: "wf1".into(),
                name: "Unrelated Workflow".into(),
                active: true,
            },
            WorkflowSummary {
                id: "wf2".into(),
                name: "Elite Council V3".into(),
                active: true,
            },
        ]);
        let url = RwLock::new("https://old.example/webhook/x".to_string());
        let healed = run_healing_protocol(&lister, &["Elite Council"], "https://humanresource.app.n8n.cloud", &url)
            .await;
        assert!(healed);
        assert_eq!(*url.read().await, "https://humanresource.app.n8n.cloud/webhook/wf2/elite-council");
    }

    #[tokio::test]
    async fn ignores_inactive_matches() {
        let lister = FixedWorkflows(vec![WorkflowSummary {
            id: "wf1".into(),
            name: "Elite Council".into(),
            active: false,
        }]);
        let url = RwLock::new("https://old.example".to_string());
        let healed = run_healing_protocol(&lister, &["Elite Council"], "https://base", &url).await;
        assert!(!healed);
        assert_eq!(*url.read().await, "https://old.example");
    }

    #[tokio::test]
    async fn lister_failure_is_non_fatal() {
        let url = RwLock::new("https://old.example".to_string());
        let healed = run_healing_protocol(&FailingLister, &["Elite Council"], "https://base", &url).await;
        assert!(!healed);
    }
}
