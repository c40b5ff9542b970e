use std::collections::BTreeMap;

use bridge_core::budget::{BudgetGuard, BudgetStatus, ExecutionCounts};
use bridge_core::config::AppConfig;
use bridge_core::model::WorkflowCounts;
use serde_json::Value;

async fn fetch_execution_counts(config: &AppConfig) -> ExecutionCounts {
    let api_key = std::env::var("N8N_API_KEY").unwrap_or_default();
    let client = reqwest::Client::new();
    let url = format!("{}/api/v1/executions?limit=250", config.http.base_url.trim_end_matches('/'));

    let Ok(resp) = client.get(&url).header("X-N8N-API-KEY", &api_key).send().await else {
        return ExecutionCounts::default();
    };
    let Ok(body) = resp.json::<Value>().await else {
        return ExecutionCounts::default();
    };

    let mut by_workflow: BTreeMap<String, WorkflowCounts> = BTreeMap::new();
    if let Some(data) = body.get("data").and_then(|d| d.as_array()) {
        for execution in data {
            let workflow_id = execution.get("workflowId").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
            let finished = execution.get("finished").and_then(|v| v.as_bool()).unwrap_or(false);
            let entry = by_workflow.entry(workflow_id).or_insert(WorkflowCounts { total: 0, success: 0, failed: 0 });
            entry.total += 1;
            if finished {
                entry.success += 1;
            } else {
                entry.failed += 1;
            }
        }
    }

    let total_workflows = by_workflow.len() as u64;
    ExecutionCounts {
        active_workflows: total_workflows,
        total_workflows,
        by_workflow,
    }
}

/// Exits 0 when usage is ok/warning, 1 when critical.
pub async fn run(config: &AppConfig, limit_override: Option<u64>) -> i32 {
    let limit = limit_override.unwrap_or(config.budget.monthly_limit);
    let guard = BudgetGuard::new(&config.budget.log_path, limit);

    let counts = fetch_execution_counts(config).await;
    let (sample, status) = guard.check_budget(&counts, Some(limit));

    println!(
        "Executions: {}/{} ({:.1}% failure rate) — status: {:?}",
        sample.total_executions, limit, sample.failure_rate, status
    );

    if status == BudgetStatus::Critical {
        1
    } else {
        0
    }
}
