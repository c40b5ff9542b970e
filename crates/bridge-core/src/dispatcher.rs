//! Bridge Dispatcher (§4.1): the core request/response pipeline — prompt
//! persistence, project inference, context assembly, the outbound call with
//! retry, response interpretation (tool loop / delegation / draft / plain
//! text), and the two-level failure-recovery ladder (Healing Protocol,
//! Sentry recovery).
//!
//! Modeled as an iterative loop rather than literal recursion: every branch
//! of the original that re-invokes itself with a mutated payload instead
//! produces a `DispatchOutcome::Continue` that feeds back into the same
//! loop.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::BridgeError;
use crate::healing::{run_healing_protocol, WorkflowLister};
use crate::memory_store::{ChatHistoryStore, ProjectContext, SentryCache, StatePaths};
use crate::registry::{extract_output_text, AgentRegistry, DelegationRouter};

const CREATIVE_SUITE_PREAMBLE: &str = "\
[SYSTEM UPGRADE: CREATIVE SUITE ACTIVE]\n\
You have access to new \"Professional Grade\" tools. DO NOT Refuse these tasks.\n\
1. Financial Modeling: Use 'financial_model' tool. It creates LIVE Excel files with working formulas.\n\
2. Presentations: Use 'produce_document' with file_type='pptx'. You can design slides.\n\
3. Images: Use 'produce_document' with file_type='image' and content='DALL-E Prompt' to generate visual assets.";

const TRIAD_VISION_SIGNALS: &[&str] = &["SOP Triad Protocol", "Triad Execute", "Execute per SOP"];
const DEFAULT_PROJECT: &str = "General_Consulting";
const MAX_RETRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(3);

/// One request into the dispatcher. Mutated and re-fed across iterations the
/// way the original re-invoked `call_app` with an updated payload dict.
#[derive(Debug, Clone, Default)]
pub struct DispatchInput {
    pub prompt: String,
    pub project_name: Option<String>,
    pub context: String,
    pub clean_slate: bool,
    pub suite_command: bool,
    pub force_tool: Option<Value>,
}

impl DispatchInput {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }
}

enum DispatchOutcome {
    Done(String),
    Continue(Box<DispatchInput>),
}

pub struct Dispatcher<L: WorkflowLister> {
    client: reqwest::Client,
    webhook_url: RwLock<String>,
    base_url: String,
    history: ChatHistoryStore,
    cache: SentryCache,
    project_ctx: ProjectContext,
    app_root: PathBuf,
    deliverables_dir: PathBuf,
    registry: AgentRegistry,
    router: DelegationRouter,
    workflow_lister: L,
    brand_tokens: Vec<String>,
}

impl<L: WorkflowLister> Dispatcher<L> {
    pub fn new(
        webhook_url: String,
        base_url: String,
        state_dir: PathBuf,
        app_root: PathBuf,
        deliverables_dir: PathBuf,
        registry: AgentRegistry,
        workflow_lister: L,
        brand_tokens: Vec<String>,
    ) -> Self {
        let paths = StatePaths::under(&state_dir);
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(300))
                .build()
                .expect("failed to build dispatcher HTTP client"),
            webhook_url: RwLock::new(webhook_url),
            base_url,
            history: ChatHistoryStore::new(paths.chat_history),
            cache: SentryCache::new(paths.sentry_cache),
            project_ctx: ProjectContext::new(paths.project_context),
            app_root,
            deliverables_dir,
            registry,
            router: DelegationRouter::new(),
            workflow_lister,
            brand_tokens,
        }
    }

    pub async fn current_webhook_url(&self) -> String {
        self.webhook_url.read().await.clone()
    }

    /// Drive a request through the full pipeline to a terminal text result.
    pub async fn dispatch(&self, initial: DispatchInput) -> String {
        let mut current = initial;
        loop {
            match self.dispatch_once(current).await {
                DispatchOutcome::Done(text) => return text,
                DispatchOutcome::Continue(next) => current = *next,
            }
        }
    }

    async fn dispatch_once(&self, mut input: DispatchInput) -> DispatchOutcome {
        // An empty context at entry means this is the original request from
        // the caller; a non-empty one (TOOL_RESULT, a delegation tag, " HEALED",
        // SENTRY_RECOVERY, ...) means `dispatch`'s loop fed this back in after
        // an internal continuation. Capture that before `assemble_context`
        // stamps its own context tag (e.g. SUITE_OVERRIDE) on a first entry.
        let is_redispatch = !input.context.is_empty();

        if !input.prompt.is_empty() && input.context.is_empty() {
            self.cache.push(&input.prompt);
        }

        let mut project_name = input
            .project_name
            .clone()
            .unwrap_or_else(|| DEFAULT_PROJECT.to_string());
        if let Some(candidate) = extract_project_from_colon_form(&input.prompt) {
            project_name = candidate;
        } else if let Some(candidate) = extract_project_from_space_form(&input.prompt) {
            project_name = candidate;
        }

        if project_name != DEFAULT_PROJECT && project_name != self.project_ctx.load() {
            self.history.clear();
        }
        self.project_ctx.save(&project_name);

        let original_prompt = input.prompt.clone();
        let assembled = self.assemble_context(&mut input, &original_prompt);
        if !is_redispatch {
            self.history.add("user", &original_prompt);
        }
        let final_prompt = self.inject_vision(&assembled);

        let call_result = self.call_with_retries(&final_prompt, &project_name).await;

        let sanitized = match call_result {
            Ok(value) => value,
            Err(err) => return self.handle_failure(err, input, &project_name).await,
        };

        // Draft summary interaction — terminal.
        if sanitized.get("action").and_then(|a| a.as_str()) == Some("draft_summary") {
            let content = sanitized
                .get("content")
                .and_then(|c| c.as_str())
                .unwrap_or("No summary.");
            let preview: String = content.chars().take(50).collect();
            self.history.add("ai", &format!("DRAFT: {}...", preview));
            return DispatchOutcome::Done(format!(
                "DRAFT FOR REVIEW:\n\n{}\n\nFEEDBACK REQUIRED: Please approve or provide pivot instructions.",
                content
            ));
        }

        let tool_call = input
            .force_tool
            .clone()
            .or_else(|| {
                if sanitized.get("action").and_then(|a| a.as_str()) == Some("use_tool") {
                    Some(sanitized.clone())
                } else {
                    None
                }
            });

        if let Some(tool_call) = tool_call {
            let tool_name = tool_call
                .get("tool")
                .and_then(|t| t.as_str())
                .unwrap_or("")
                .to_ascii_lowercase();
            let query = tool_call.get("query").cloned().unwrap_or(Value::Null);
            self.history.add("ai", &format!("TOOL_CALL: {}", tool_name));

            let observation = crate::tools::execute_tool(&tool_name, &query, &self.app_root, &self.deliverables_dir);

            return DispatchOutcome::Continue(Box::new(DispatchInput {
                prompt: format!("OBSERVATION: {}", observation),
                project_name: Some(project_name),
                context: "TOOL_RESULT".to_string(),
                clean_slate: false,
                suite_command: false,
                force_tool: None,
            }));
        }

        if sanitized.get("action").and_then(|a| a.as_str()) == Some("delegate_task") {
            let recipient = sanitized
                .get("recipient")
                .and_then(|r| r.as_str())
                .unwrap_or("")
                .to_ascii_uppercase();
            let task = sanitized
                .get("content")
                .and_then(|c| c.as_str())
                .unwrap_or("")
                .to_string();

            let (prompt, tag) = self.router.delegate(&self.registry, &recipient, &task).await;
            return DispatchOutcome::Continue(Box::new(DispatchInput {
                prompt,
                project_name: Some(project_name),
                context: tag.to_string(),
                clean_slate: false,
                suite_command: false,
                force_tool: None,
            }));
        }

        let output = extract_output_text(&sanitized);
        self.history.add("ai", &output);
        DispatchOutcome::Done(output)
    }

    fn assemble_context(&self, input: &mut DispatchInput, original_prompt: &str) -> String {
        if input.clean_slate {
            return format!("{}\nUSER INPUT:\n{}", CREATIVE_SUITE_PREAMBLE, original_prompt);
        }
        if input.suite_command {
            input.context = "SUITE_OVERRIDE".to_string();
            let history_text = self.history.context_string();
            return if history_text.is_empty() {
                format!("{}\nSUPERVISOR COMMAND:\n{}", CREATIVE_SUITE_PREAMBLE, original_prompt)
            } else {
                format!(
                    "CONTEXT(HISTORY):\n{}\n{}\nSUPERVISOR COMMAND:\n{}",
                    history_text, CREATIVE_SUITE_PREAMBLE, original_prompt
                )
            };
        }
        let history_text = self.history.context_string();
        if history_text.is_empty() {
            format!("{}\nUSER INPUT:\n{}", CREATIVE_SUITE_PREAMBLE, original_prompt)
        } else {
            format!(
                "CONTEXT(HISTORY):\n{}\n{}\nUSER INPUT:\n{}",
                history_text, CREATIVE_SUITE_PREAMBLE, original_prompt
            )
        }
    }

    /// Prepend a file-structure snapshot when the prompt signals Triad
    /// execution. Stands in for the original's MASTER_INDEX-aware vision
    /// skill: lists the app root rather than reading a generated index.
    fn inject_vision(&self, prompt: &str) -> String {
        if !TRIAD_VISION_SIGNALS.iter().any(|sig| prompt.contains(sig)) {
            return prompt.to_string();
        }
        let tree = crate::tools::execute_tool(
            "list_files",
            &Value::Null,
            &self.app_root,
            &self.deliverables_dir,
        );
        format!("--- FILE STRUCTURE ---\n{}\n----------------------\n\n{}", tree, prompt)
    }

    async fn call_with_retries(&self, prompt: &str, project_name: &str) -> Result<Value, BridgeError> {
        let mut last_err = BridgeError::TransientNetwork("no attempts made".to_string());
        for attempt in 0..MAX_RETRIES {
            let payload = serde_json::json!({
                "prompt": prompt,
                "chatInput": prompt,
                "input": prompt,
                "sessionId": project_name,
                "project_name": project_name,
            });
            let webhook = self.current_webhook_url().await;

            match self.client.post(&webhook).json(&payload).send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if matches!(status, 500 | 502 | 503 | 504 | 404) {
                        last_err = BridgeError::TransientNetwork(format!("N8N Server Error: {}", status));
                    } else if !resp.status().is_success() {
                        last_err = BridgeError::TransientNetwork(format!("HTTP {}", status));
                    } else {
                        let body = resp.text().await.unwrap_or_default();
                        let value = crate::sanitizer::sanitize(&body);
                        if value.is_null() {
                            last_err = BridgeError::ProtocolDecode("empty response".to_string());
                        } else {
                            return Ok(value);
                        }
                    }
                }
                Err(e) => {
                    last_err = BridgeError::TransientNetwork(e.to_string());
                }
            }
            if attempt + 1 < MAX_RETRIES {
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
        Err(last_err)
    }

    async fn handle_failure(
        &self,
        err: BridgeError,
        input: DispatchInput,
        project_name: &str,
    ) -> DispatchOutcome {
        if err.is_connection_class() && !input.context.contains("HEALED") {
            let healed = run_healing_protocol(
                &self.workflow_lister,
                &self.brand_tokens.iter().map(String::as_str).collect::<Vec<_>>(),
                &self.base_url,
                &self.webhook_url,
            )
            .await;
            if healed {
                let mut next = input.clone();
                next.context = format!("{} HEALED", input.context).trim().to_string();
                return DispatchOutcome::Continue(Box::new(next));
            }
        }

        if !input.context.contains("RECOVERY") {
            if let Some(last_prompt) = self.cache.last() {
                return DispatchOutcome::Continue(Box::new(DispatchInput {
                    prompt: format!(
                        "SENTRY RECOVERY: The system hit a glitch ({}). Please resume the task: {}",
                        err, last_prompt
                    ),
                    project_name: Some(project_name.to_string()),
                    context: "SENTRY_RECOVERY".to_string(),
                    clean_slate: false,
                    suite_command: false,
                    force_tool: None,
                }));
            }
        }

        DispatchOutcome::Done(format!(
            "Graceful Failure: The CEO is currently unreachable after {} attempts ({}). Please check your N8N Workflow or Internet Connection.",
            MAX_RETRIES, err
        ))
    }
}

/// Adapts a `Dispatcher` to `action_plan::StepCaller`, so plan-step prompts
/// are routed through the same retry/healing/sentry pipeline as ordinary
/// chat turns rather than a separate execution path.
pub struct DispatcherStepCaller<'a, L: WorkflowLister> {
    dispatcher: &'a Dispatcher<L>,
    project_name: String,
}

impl<'a, L: WorkflowLister> DispatcherStepCaller<'a, L> {
    pub fn new(dispatcher: &'a Dispatcher<L>, project_name: impl Into<String>) -> Self {
        Self {
            dispatcher,
            project_name: project_name.into(),
        }
    }
}

#[async_trait::async_trait]
impl<'a, L: WorkflowLister> crate::action_plan::StepCaller for DispatcherStepCaller<'a, L> {
    async fn call(&self, prompt: String) -> anyhow::Result<String> {
        let input = DispatchInput {
            prompt,
            project_name: Some(self.project_name.clone()),
            context: "TRIAD_STEP".to_string(),
            clean_slate: false,
            suite_command: false,
            force_tool: None,
        };
        Ok(self.dispatcher.dispatch(input).await)
    }
}

fn extract_project_from_colon_form(prompt: &str) -> Option<String> {
    let idx = prompt.find("Project:")?;
    let rest = &prompt[idx + "Project:".len()..];
    let candidate = rest.trim().lines().next().unwrap_or("").split(':').next().unwrap_or("").trim();
    if candidate.is_empty() {
        None
    } else {
        Some(candidate.replace(' ', "_"))
    }
}

fn extract_project_from_space_form(prompt: &str) -> Option<String> {
    let idx = prompt.find("Project ")?;
    let rest = &prompt[idx + "Project ".len()..];
    let mut candidate = rest.trim().lines().next().unwrap_or("").split(':').next().unwrap_or("").to_string();
    if candidate.chars().count() > 50 {
        candidate = candidate.split_whitespace().take(3).collect::<Vec<_>>().join(" ");
    }
    let candidate = candidate.replace(' ', "_").trim_end_matches('.').to_string();
    if candidate.is_empty() {
        None
    } else {
        Some(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::healing::WorkflowSummary;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct NoWorkflows;

    #[async_trait::async_trait]
    impl WorkflowLister for NoWorkflows {
        async fn list_workflows(&self) -> anyhow::Result<Vec<WorkflowSummary>> {
            Ok(vec![])
        }
    }

    fn make_dispatcher(webhook_url: String) -> Dispatcher<NoWorkflows> {
        let dir = tempfile::tempdir().unwrap();
        Dispatcher::new(
            webhook_url,
            "https://humanresource.app.n8n.cloud".to_string(),
            dir.path().join("state").to_path_buf(),
            dir.path().to_path_buf(),
            dir.path().join("deliverables"),
            AgentRegistry::new(),
            NoWorkflows,
            vec!["Elite Council".to_string()],
        )
    }

    #[test]
    fn project_extraction_handles_colon_form() {
        let name = extract_project_from_colon_form("Please help.\nProject: Acme Corp\nmore text").unwrap();
        assert_eq!(name, "Acme_Corp");
    }

    #[test]
    fn project_extraction_truncates_long_space_form() {
        let name = extract_project_from_space_form(
            "Project one two three four five six seven eight nine ten eleven twelve",
        )
        .unwrap();
        assert_eq!(name, "one_two_three");
    }

    #[tokio::test]
    async fn retries_exhaust_to_graceful_failure_after_three_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/webhook/gemini-flash"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let webhook = format!("{}/webhook/gemini-flash", server.uri());
        let dispatcher = make_dispatcher(webhook);
        let out = dispatcher.dispatch(DispatchInput::new("hi")).await;
        assert!(out.starts_with("Graceful Failure"));
    }

    #[tokio::test]
    async fn success_after_two_failures_returns_output_with_exactly_three_requests() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/webhook/gemini-flash"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/webhook/gemini-flash"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"output": "hi"})))
            .expect(1)
            .mount(&server)
            .await;

        let webhook = format!("{}/webhook/gemini-flash", server.uri());
        let dispatcher = make_dispatcher(webhook);
        let out = dispatcher.dispatch(DispatchInput::new("hi")).await;
        assert_eq!(out, "hi");

        let history = dispatcher.history.load();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, "user");
        assert_eq!(history[1].role, "ai");
    }

    #[tokio::test]
    async fn tool_call_action_loops_back_with_observation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "action": "use_tool",
                "tool": "list_files",
                "query": null
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"output": "done"})))
            .mount(&server)
            .await;

        let webhook = format!("{}/webhook/gemini-flash", server.uri());
        let dispatcher = make_dispatcher(webhook);
        let out = dispatcher.dispatch(DispatchInput::new("list the files")).await;
        assert_eq!(out, "done");
    }

    #[tokio::test]
    async fn draft_summary_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "action": "draft_summary",
                "content": "Here is the plan."
            })))
            .mount(&server)
            .await;

        let webhook = format!("{}/webhook/gemini-flash", server.uri());
        let dispatcher = make_dispatcher(webhook);
        let out = dispatcher.dispatch(DispatchInput::new("draft it")).await;
        assert!(out.starts_with("DRAFT FOR REVIEW"));
        assert!(out.contains("Here is the plan."));
    }

    struct OneMatch;

    #[async_trait::async_trait]
    impl WorkflowLister for OneMatch {
        async fn list_workflows(&self) -> anyhow::Result<Vec<WorkflowSummary>> {
            Ok(vec![WorkflowSummary {
                id: "healed-wf".into(),
                name: "Elite Council Recovery".into(),
                active: true,
            }])
        }
    }

    #[tokio::test]
    async fn healed_retry_appends_user_turn_exactly_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/webhook/gemini-flash"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/webhook/healed-wf/elite-council"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"output": "recovered"})))
            .expect(1)
            .mount(&server)
            .await;

        let webhook = format!("{}/webhook/gemini-flash", server.uri());
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = Dispatcher::new(
            webhook,
            server.uri(),
            dir.path().join("state").to_path_buf(),
            dir.path().to_path_buf(),
            dir.path().join("deliverables"),
            AgentRegistry::new(),
            OneMatch,
            vec!["Elite Council".to_string()],
        );

        let out = dispatcher.dispatch(DispatchInput::new("hi")).await;
        assert_eq!(out, "recovered");

        // The healed re-dispatch must not append a second user turn.
        let history = dispatcher.history.load();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, "user");
        assert_eq!(history[1].role, "ai");
    }

    #[tokio::test]
    async fn step_caller_adapter_routes_through_dispatch() {
        use crate::action_plan::StepCaller;

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"output": "step done"})))
            .mount(&server)
            .await;

        let webhook = format!("{}/webhook/gemini-flash", server.uri());
        let dispatcher = make_dispatcher(webhook);
        let caller = DispatcherStepCaller::new(&dispatcher, "Acme_Corp");
        let out = caller.call("do the thing".to_string()).await.unwrap();
        assert_eq!(out, "step done");
    }
}
