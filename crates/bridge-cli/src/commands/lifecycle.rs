use bridge_core::config::{AppConfig, WorkflowEntry};
use clap::ValueEnum;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LifecycleAction {
    Activate,
    Deactivate,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LifecycleTarget {
    Alpha,
    Meta,
    All,
}

fn workflows_for<'a>(config: &'a AppConfig, target: LifecycleTarget) -> Vec<&'a WorkflowEntry> {
    match target {
        LifecycleTarget::Alpha => config.workflows.alpha.iter().collect(),
        LifecycleTarget::Meta => config.workflows.meta.iter().collect(),
        LifecycleTarget::All => config.workflows.alpha.iter().chain(config.workflows.meta.iter()).collect(),
    }
}

/// Activates or deactivates every configured workflow in `target`. Exits 0 on
/// full success, 1 if any workflow failed to transition.
pub async fn run(action: LifecycleAction, target: LifecycleTarget, config: &AppConfig) -> i32 {
    let workflows = workflows_for(config, target);
    if workflows.is_empty() {
        println!("No workflows configured for this target.");
        return 0;
    }

    let api_key = std::env::var("N8N_API_KEY").unwrap_or_default();
    let client = reqwest::Client::new();
    let verb = match action {
        LifecycleAction::Activate => "activate",
        LifecycleAction::Deactivate => "deactivate",
    };

    let mut failures = 0;
    for wf in workflows {
        let url = format!("{}/api/v1/workflows/{}/{}", config.http.base_url.trim_end_matches('/'), wf.id, verb);
        match client.post(&url).header("X-N8N-API-KEY", &api_key).send().await {
            Ok(resp) if resp.status().is_success() => println!("{}: {} OK", wf.name, verb),
            Ok(resp) => {
                println!("{}: {} FAILED (HTTP {})", wf.name, verb, resp.status());
                failures += 1;
            }
            Err(e) => {
                println!("{}: {} FAILED ({})", wf.name, verb, e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        1
    } else {
        0
    }
}
