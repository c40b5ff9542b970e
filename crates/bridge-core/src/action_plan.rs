//! Action Plan Engine (§4.5): parse an LLM response into a plan, revise it,
//! execute it step by step, detect artifacts, and render a mission report.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::model::{ActionPlan, PlanStatus, PlanStep, RevisionRecord, RiskLevel, StepStatus};

const CRITICAL_KEYWORDS: &[&str] = &[
    "deploy", "delete", "remove", "execute", "production", "docker", "push",
];
const CAUTION_KEYWORDS: &[&str] = &[
    "write", "create", "generate", "modify", "update", "code", "script", "file",
];
const CAUTION_TOOLS: &[&str] = &["file_system_tool", "produce_document", "google_workspace"];

fn normalize_agent(raw: &str) -> String {
    match raw.to_ascii_lowercase().as_str() {
        "gemini" => "Gemini".to_string(),
        "antigravity" => "Antigravity".to_string(),
        "claude" => "Claude".to_string(),
        "ceo" => "CEO".to_string(),
        "cfo" => "CFO".to_string(),
        "cmo" => "CMO".to_string(),
        "hr" => "HR".to_string(),
        "critic" => "Critic".to_string(),
        "architect" => "Architect".to_string(),
        "pitch" => "Pitch".to_string(),
        "atomizer" => "Atomizer".to_string(),
        "presentation_architect" => "Architect".to_string(),
        _ => raw.to_string(),
    }
}

/// Rule-based risk classification on description text and tool list.
pub fn classify_risk(description: &str, tools: &[String]) -> RiskLevel {
    let desc_lower = description.to_ascii_lowercase();
    if CRITICAL_KEYWORDS.iter().any(|k| desc_lower.contains(k)) {
        return RiskLevel::Critical;
    }
    let caution_by_desc = CAUTION_KEYWORDS.iter().any(|k| desc_lower.contains(k));
    let caution_by_tool = tools
        .iter()
        .any(|t| CAUTION_TOOLS.contains(&t.to_ascii_lowercase().as_str()));
    if caution_by_desc || caution_by_tool {
        return RiskLevel::Caution;
    }
    RiskLevel::Safe
}

fn step_from_value(v: &Value) -> PlanStep {
    let agent_raw = v
        .get("agent")
        .and_then(|a| a.as_str())
        .unwrap_or("generic")
        .to_string();
    let agent = normalize_agent(&agent_raw);

    let description = v
        .get("description")
        .or_else(|| v.get("action"))
        .or_else(|| v.get("details"))
        .and_then(|d| d.as_str())
        .unwrap_or("")
        .to_string();

    let tools: Vec<String> = v
        .get("tools")
        .and_then(|t| t.as_array())
        .map(|arr| arr.iter().filter_map(|x| x.as_str().map(String::from)).collect())
        .unwrap_or_default();

    let reference_code = v
        .get("reference_code")
        .and_then(|r| r.as_str())
        .map(String::from);

    let risk_level = classify_risk(&description, &tools);

    let mut step = PlanStep::new(0, agent, description);
    step.tools = tools;
    step.reference_code = reference_code;
    step.risk_level = risk_level;
    step
}

/// Parse a decoded JSON object (already passed through the sanitizer) into
/// an [`ActionPlan`]. Steps carrying `expected_output.tasks[]` expand into
/// sibling steps in place of the parent; step numbers are renumbered
/// contiguously from 1 afterward. Returns `None` if no steps can be derived.
pub fn parse_plan(value: &Value, task: &str) -> Option<ActionPlan> {
    let raw_steps = value.get("steps").and_then(|s| s.as_array())?;
    if raw_steps.is_empty() {
        return None;
    }

    let mut steps = Vec::new();
    for raw in raw_steps {
        let sub_tasks = raw
            .get("expected_output")
            .and_then(|eo| eo.get("tasks"))
            .and_then(|t| t.as_array());

        match sub_tasks {
            Some(tasks) if !tasks.is_empty() => {
                for sub in tasks {
                    steps.push(step_from_value(sub));
                }
            }
            _ => steps.push(step_from_value(raw)),
        }
    }

    if steps.is_empty() {
        return None;
    }

    Some(ActionPlan::new(task, steps))
}

/// Build the revision prompt: the prior plan serialized as JSON plus the
/// user's free-text feedback.
pub fn build_revision_prompt(plan: &ActionPlan, feedback: &str) -> String {
    let plan_json = serde_json::to_string_pretty(&plan.steps).unwrap_or_default();
    format!(
        "The current plan is:\n{}\n\nThe user has this feedback:\n{}\n\nProduce a revised plan as JSON.",
        plan_json, feedback
    )
}

/// Apply a freshly parsed revision: copy `user_notes` forward by matching
/// step_number, push the prior step set into `revision_history`, replace the
/// steps, and increment `revision_count`. Leaves the plan unchanged if
/// `new_plan` has no steps (a failed parse).
pub fn apply_revision(plan: &mut ActionPlan, new_plan: Option<ActionPlan>) {
    let Some(mut new_plan) = new_plan else {
        return;
    };
    if new_plan.steps.is_empty() {
        return;
    }

    for new_step in new_plan.steps.iter_mut() {
        if let Some(old_step) = plan.steps.iter().find(|s| s.step_number == new_step.step_number) {
            new_step.user_notes = old_step.user_notes.clone();
        }
    }

    plan.revision_history.push(RevisionRecord {
        steps: plan.steps.clone(),
        timestamp: Utc::now(),
    });
    plan.steps = new_plan.steps;
    plan.renumber();
    plan.revision_count += 1;
}

/// Implemented by the caller providing the actual dispatch (the Bridge
/// Dispatcher in production, a mock in tests).
#[async_trait::async_trait]
pub trait StepCaller: Send + Sync {
    async fn call(&self, prompt: String) -> anyhow::Result<String>;
}

fn build_step_prompt(plan: &ActionPlan, idx: usize) -> String {
    let step = &plan.steps[idx];
    let mut digest = String::new();
    for prior in &plan.steps[..idx] {
        if prior.status == StepStatus::Done {
            if let Some(output) = &prior.output {
                let truncated: String = output.chars().take(300).collect();
                digest.push_str(&format!("\n- Step {} ({}): {}", prior.step_number, prior.agent, truncated));
            }
        }
    }

    format!(
        "Task: {}\nStep {} / Agent: {}\nDescription: {}\nTools: {}\n{}{}{}\n\nExecute this step now. Do not produce another plan.",
        plan.task,
        step.step_number,
        step.agent,
        step.description,
        step.tools.join(", "),
        step.reference_code
            .as_ref()
            .map(|c| format!("Reference code:\n{}\n", c))
            .unwrap_or_default(),
        step.user_notes
            .as_ref()
            .map(|n| format!("User notes: {}\n", n))
            .unwrap_or_default(),
        if digest.is_empty() {
            String::new()
        } else {
            format!("Prior step outputs:{}", digest)
        },
    )
}

/// Execute every step in order, honoring cancel, pause, and skip. Calls
/// `on_progress` after every step transition (and exactly once for a
/// zero-step plan). Returns the terminal [`PlanStatus`].
pub async fn execute_plan<C: StepCaller>(
    plan: &Arc<Mutex<ActionPlan>>,
    caller: &C,
    deliverables_dir: &Path,
    mut on_progress: impl FnMut(&ActionPlan),
) -> PlanStatus {
    let step_count = {
        let guard = plan.lock().await;
        guard.steps.len()
    };

    if step_count == 0 {
        let mut guard = plan.lock().await;
        guard.status = PlanStatus::Complete;
        on_progress(&guard);
        return PlanStatus::Complete;
    }

    for idx in 0..step_count {
        // Honor pause before starting the step.
        loop {
            let (paused, cancelled) = {
                let guard = plan.lock().await;
                (guard.paused, guard.cancel)
            };
            if cancelled || !paused {
                break;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        let cancelled = plan.lock().await.cancel;
        if cancelled {
            let mut guard = plan.lock().await;
            guard.status = PlanStatus::Failed;
            on_progress(&guard);
            return PlanStatus::Failed;
        }

        let (skip, prompt) = {
            let guard = plan.lock().await;
            if guard.steps[idx].skipped {
                (true, String::new())
            } else {
                (false, build_step_prompt(&guard, idx))
            }
        };

        if skip {
            let mut guard = plan.lock().await;
            guard.steps[idx].status = StepStatus::Skipped;
            on_progress(&guard);
            continue;
        }

        let started = Instant::now();
        let result = caller.call(prompt).await;
        let elapsed = started.elapsed().as_secs_f64();

        let pause_after = {
            let mut guard = plan.lock().await;
            match result {
                Ok(output) => {
                    guard.steps[idx].status = StepStatus::Done;
                    guard.steps[idx].elapsed_seconds = elapsed;
                    let artifacts = detect_artifacts(&output, deliverables_dir);
                    guard.steps[idx].output = Some(output);
                    for artifact in artifacts {
                        guard.push_artifact(artifact);
                    }
                    on_progress(&guard);
                    guard.steps[idx].pause_after
                }
                Err(e) => {
                    guard.steps[idx].status = StepStatus::Failed;
                    guard.steps[idx].error = Some(e.to_string());
                    guard.steps[idx].elapsed_seconds = elapsed;
                    on_progress(&guard);
                    guard.status = PlanStatus::Failed;
                    return PlanStatus::Failed;
                }
            }
        };

        if pause_after {
            plan.lock().await.paused = true;
            loop {
                let (paused, cancelled) = {
                    let guard = plan.lock().await;
                    (guard.paused, guard.cancel)
                };
                if cancelled || !paused {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }

    let mut guard = plan.lock().await;
    let all_terminal_ok = guard
        .steps
        .iter()
        .all(|s| matches!(s.status, StepStatus::Done | StepStatus::Skipped));
    guard.status = if all_terminal_ok {
        PlanStatus::Complete
    } else {
        PlanStatus::Failed
    };
    on_progress(&guard);
    guard.status
}

static PRODUCE_DOC_RE: once_cell::sync::Lazy<regex::Regex> = once_cell::sync::Lazy::new(|| {
    regex::Regex::new(r#"produce_document\(\s*file_type\s*=\s*"([^"]*)"\s*,\s*content\s*=\s*"([^"]*)"\s*\)"#).unwrap()
});

static URL_PATH_RE: once_cell::sync::Lazy<regex::Regex> = once_cell::sync::Lazy::new(|| {
    regex::Regex::new(r"(?:saved to|created|written to)\s+(\S+\.(?:json|csv|xlsx|pptx|py|md|txt))").unwrap()
});

fn ext_for_file_type(file_type: &str) -> (&'static str, bool) {
    match file_type.to_ascii_lowercase().as_str() {
        "csv" => ("csv", false),
        "json" => ("json", false),
        "py" => ("py", false),
        "md" => ("md", false),
        "txt" => ("txt", false),
        _ => ("md", true),
    }
}

/// Scan a step's output for produced artifacts, in priority order:
/// 1. An explicit `produce_document(file_type=..., content=...)` call.
/// 2. Otherwise, if the output is long, persist the whole thing as markdown.
/// 3. Scrape `saved to|created|written to <path>` mentions.
pub fn detect_artifacts(output: &str, deliverables_dir: &Path) -> Vec<String> {
    let mut artifacts = Vec::new();

    if let Some(caps) = PRODUCE_DOC_RE.captures(output) {
        let file_type = caps.get(1).map(|m| m.as_str()).unwrap_or("md");
        let content = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        let (ext, stamped) = ext_for_file_type(file_type);
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let filename = format!("artifact_{}.{}", timestamp, ext);
        let path = deliverables_dir.join(&filename);

        let body = if stamped {
            format!("<!-- original type: {} -->\n{}", file_type, content)
        } else {
            content.to_string()
        };

        if std::fs::create_dir_all(deliverables_dir).is_ok() && std::fs::write(&path, body).is_ok() {
            artifacts.push(path.to_string_lossy().to_string());
        }
    } else if output.len() > 200 {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let filename = format!("output_{}.md", timestamp);
        let path = deliverables_dir.join(&filename);
        if std::fs::create_dir_all(deliverables_dir).is_ok() && std::fs::write(&path, output).is_ok() {
            artifacts.push(path.to_string_lossy().to_string());
        }
    }

    for caps in URL_PATH_RE.captures_iter(output) {
        if let Some(m) = caps.get(1) {
            let found = m.as_str().to_string();
            if !artifacts.contains(&found) {
                artifacts.push(found);
            }
        }
    }

    artifacts
}

/// Render a human-readable mission report for a completed plan.
pub fn generate_mission_report(plan: &ActionPlan) -> String {
    let mut out = String::new();
    out.push_str(&format!("MISSION REPORT — {:?}\n", plan.status));
    out.push_str(&format!("Task: {}\n\n", plan.task));

    for step in &plan.steps {
        let preview: String = step
            .output
            .as_ref()
            .and_then(|o| o.lines().next())
            .unwrap_or("")
            .chars()
            .take(120)
            .collect();
        out.push_str(&format!(
            "Step {} [{:?}] {} ({:.2}s)\n",
            step.step_number, step.status, step.agent, step.elapsed_seconds
        ));
        if !preview.is_empty() {
            out.push_str(&format!("  output: {}\n", preview));
        }
        if let Some(err) = &step.error {
            out.push_str(&format!("  error: {}\n", err));
        }
    }

    if !plan.artifacts.is_empty() {
        out.push_str("\nArtifacts:\n");
        for (i, artifact) in plan.artifacts.iter().enumerate() {
            out.push_str(&format!("  {}. {}\n", i + 1, artifact));
        }
    }

    let mut urls: Vec<&String> = plan
        .artifacts
        .iter()
        .filter(|a| a.starts_with("http://") || a.starts_with("https://"))
        .collect();
    urls.dedup();
    if !urls.is_empty() {
        out.push_str("\nReferenced URLs:\n");
        for url in urls.into_iter().take(10) {
            out.push_str(&format!("  - {}\n", url));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoCaller;

    #[async_trait::async_trait]
    impl StepCaller for EchoCaller {
        async fn call(&self, prompt: String) -> anyhow::Result<String> {
            Ok(format!("done: {}", prompt.lines().next().unwrap_or_default()))
        }
    }

    struct FailingCaller;

    #[async_trait::async_trait]
    impl StepCaller for FailingCaller {
        async fn call(&self, _prompt: String) -> anyhow::Result<String> {
            anyhow::bail!("boom")
        }
    }

    #[test]
    fn risk_classification_rules() {
        assert_eq!(classify_risk("deploy to production", &[]), RiskLevel::Critical);
        assert_eq!(classify_risk("write a summary", &[]), RiskLevel::Caution);
        assert_eq!(
            classify_risk("look things up", &["google_workspace".to_string()]),
            RiskLevel::Caution
        );
        assert_eq!(classify_risk("just think about it", &[]), RiskLevel::Safe);
    }

    #[test]
    fn parser_expands_nested_expected_output_tasks() {
        let value = json!({
            "steps": [{
                "agent": "planner",
                "description": "parent",
                "expected_output": {
                    "tasks": [
                        {"agent": "cfo", "description": "X"},
                        {"agent": "cmo", "description": "Y"},
                    ]
                }
            }]
        });
        let plan = parse_plan(&value, "task").unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].step_number, 1);
        assert_eq!(plan.steps[1].step_number, 2);
        assert_eq!(plan.steps[0].agent, "CFO");
        assert_eq!(plan.steps[1].agent, "CMO");
    }

    #[test]
    fn parser_returns_none_for_empty_steps() {
        assert!(parse_plan(&json!({"steps": []}), "task").is_none());
        assert!(parse_plan(&json!({}), "task").is_none());
    }

    #[test]
    fn revision_preserves_user_notes_by_step_number() {
        let mut plan = ActionPlan::new("t", vec![PlanStep::new(1, "generic", "a")]);
        plan.steps[0].user_notes = Some("please be careful".to_string());

        let new_plan = ActionPlan::new("t", vec![PlanStep::new(1, "generic", "a revised")]);
        apply_revision(&mut plan, Some(new_plan));

        assert_eq!(plan.revision_count, 1);
        assert_eq!(plan.revision_history.len(), 1);
        assert_eq!(plan.steps[0].user_notes, Some("please be careful".to_string()));
        assert_eq!(plan.steps[0].description, "a revised");
    }

    #[test]
    fn failed_revision_leaves_plan_unchanged() {
        let mut plan = ActionPlan::new("t", vec![PlanStep::new(1, "generic", "a")]);
        apply_revision(&mut plan, None);
        assert_eq!(plan.revision_count, 0);
        assert_eq!(plan.steps[0].description, "a");
    }

    #[tokio::test]
    async fn zero_step_plan_completes_and_fires_progress_once() {
        let plan = Arc::new(Mutex::new(ActionPlan::new("t", vec![])));
        let caller = EchoCaller;
        let dir = tempfile::tempdir().unwrap();
        let mut calls = 0;
        let status = execute_plan(&plan, &caller, dir.path(), |_| calls += 1).await;
        assert_eq!(status, PlanStatus::Complete);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn failed_step_aborts_remaining_steps() {
        let steps = vec![
            PlanStep::new(1, "generic", "first"),
            PlanStep::new(2, "generic", "second"),
        ];
        let plan = Arc::new(Mutex::new(ActionPlan::new("t", steps)));
        let caller = FailingCaller;
        let dir = tempfile::tempdir().unwrap();
        let status = execute_plan(&plan, &caller, dir.path(), |_| {}).await;
        assert_eq!(status, PlanStatus::Failed);

        let guard = plan.lock().await;
        assert_eq!(guard.steps[0].status, StepStatus::Failed);
        assert_eq!(guard.steps[1].status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn skipped_step_never_dispatches() {
        let mut steps = vec![PlanStep::new(1, "generic", "skip me")];
        steps[0].skipped = true;
        let plan = Arc::new(Mutex::new(ActionPlan::new("t", steps)));
        let caller = EchoCaller;
        let dir = tempfile::tempdir().unwrap();
        let status = execute_plan(&plan, &caller, dir.path(), |_| {}).await;
        assert_eq!(status, PlanStatus::Complete);
        assert_eq!(plan.lock().await.steps[0].status, StepStatus::Skipped);
    }

    #[test]
    fn artifact_detection_unknown_type_maps_to_md_with_stamp() {
        let dir = tempfile::tempdir().unwrap();
        let output = r#"produce_document(file_type="pptx", content="body")"#;
        let artifacts = detect_artifacts(output, dir.path());
        assert_eq!(artifacts.len(), 1);
        assert!(artifacts[0].ends_with(".md"));
        let content = std::fs::read_to_string(&artifacts[0]).unwrap();
        assert!(content.contains("original type: pptx"));
        assert!(content.contains("body"));
    }

    #[test]
    fn artifact_detection_known_type_maps_one_to_one() {
        let dir = tempfile::tempdir().unwrap();
        let output = r#"produce_document(file_type="csv", content="a,b\n1,2")"#;
        let artifacts = detect_artifacts(output, dir.path());
        assert_eq!(artifacts.len(), 1);
        assert!(artifacts[0].ends_with(".csv"));
    }

    #[test]
    fn artifact_detection_falls_back_to_raw_dump_over_200_chars() {
        let dir = tempfile::tempdir().unwrap();
        let output = "x".repeat(250);
        let artifacts = detect_artifacts(&output, dir.path());
        assert_eq!(artifacts.len(), 1);
        assert!(artifacts[0].ends_with(".md"));
    }

    #[test]
    fn artifact_detection_scrapes_mentioned_paths() {
        let dir = tempfile::tempdir().unwrap();
        let output = "Report saved to reports/summary.csv for review.";
        let artifacts = detect_artifacts(output, dir.path());
        assert!(artifacts.contains(&"reports/summary.csv".to_string()));
    }
}
