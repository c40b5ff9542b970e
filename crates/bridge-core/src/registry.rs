//! Agent Registry & Router (§4.3): role -> endpoint resolution and
//! delegation dispatch.

use std::collections::HashMap;
use std::time::Duration;

use crate::model::AgentEndpoint;

#[derive(Debug, Default, Clone)]
pub struct AgentRegistry {
    endpoints: HashMap<String, AgentEndpoint>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, endpoint: AgentEndpoint) {
        self.endpoints.insert(endpoint.role.clone(), endpoint);
    }

    pub fn resolve(&self, role: &str) -> Option<&AgentEndpoint> {
        self.endpoints.get(role)
    }

    pub fn roles(&self) -> Vec<&str> {
        self.endpoints.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

/// Extracts output text from a decoded JSON object using the fixed
/// priority-list rule shared by the Dispatcher (§4.1 step 8) and the
/// Delegation Router (§4.3): the first non-empty of `output`, `text`,
/// `message`, `chatOutput`, `response`, `answer`; falls back to the whole
/// object serialized.
pub fn extract_output_text(value: &serde_json::Value) -> String {
    const PRIORITY_KEYS: &[&str] = &["output", "text", "message", "chatOutput", "response", "answer"];
    for key in PRIORITY_KEYS {
        if let Some(v) = value.get(key) {
            if let Some(s) = v.as_str() {
                if !s.is_empty() {
                    return s.to_string();
                }
            }
        }
    }
    value.to_string()
}

const TOOL_AWARENESS_PREAMBLE: &str = "\
You have access to the following tools. To use one, respond with a JSON \
object of the form {\"action\": \"use_tool\", \"tool\": \"<name>\", \"query\": <args>}.\n\
Available tools: list_files, market_search, vector_memory, google_workspace, \
financial_model, produce_document, write_file, modify_code.";

pub fn tool_awareness_preamble() -> &'static str {
    TOOL_AWARENESS_PREAMBLE
}

pub struct DelegationRouter {
    client: reqwest::Client,
}

impl Default for DelegationRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl DelegationRouter {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .expect("failed to build delegation HTTP client"),
        }
    }

    /// Resolve `recipient` against the registry and POST the delegation
    /// payload. Returns the Dispatcher re-feed prompt and its context tag on
    /// success, or a structured `SYSTEM_ERROR` re-feed for unknown roles /
    /// request failures.
    pub async fn delegate(
        &self,
        registry: &AgentRegistry,
        recipient: &str,
        task: &str,
    ) -> (String, &'static str) {
        let Some(endpoint) = registry.resolve(recipient) else {
            return (
                format!("SYSTEM_ERROR: unknown delegation recipient '{}'", recipient),
                "SYSTEM_ERROR",
            );
        };

        let payload = serde_json::json!({
            "prompt": format!("{}\n\n{}", tool_awareness_preamble(), task),
        });

        match self.client.post(&endpoint.url).json(&payload).send().await {
            Ok(resp) => {
                let body = resp.text().await.unwrap_or_default();
                let value = crate::sanitizer::sanitize(&body);
                let output = extract_output_text(&value);
                (
                    format!("OBSERVATION FROM {}: {}", recipient, output),
                    "DELEGATION_RESULT",
                )
            }
            Err(e) => (
                format!("SYSTEM_ERROR: delegation to '{}' failed: {}", recipient, e),
                "SYSTEM_ERROR",
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_registered_role() {
        let mut registry = AgentRegistry::new();
        registry.register(AgentEndpoint {
            role: "cfo".into(),
            url: "https://example.test/cfo".into(),
            is_shared: false,
        });
        assert!(registry.resolve("cfo").is_some());
        assert!(registry.resolve("missing").is_none());
    }

    #[test]
    fn extract_output_text_priority_order() {
        assert_eq!(extract_output_text(&json!({"output": "a", "text": "b"})), "a");
        assert_eq!(extract_output_text(&json!({"text": "b"})), "b");
        assert_eq!(extract_output_text(&json!({"chatOutput": "c"})), "c");
    }

    #[test]
    fn extract_output_text_falls_back_to_whole_object() {
        let v = json!({"weird": "shape"});
        assert_eq!(extract_output_text(&v), v.to_string());
    }

    #[test]
    fn extract_output_text_skips_empty_strings() {
        assert_eq!(extract_output_text(&json!({"output": "", "text": "real"})), "real");
    }

    #[tokio::test]
    async fn delegate_to_unknown_role_yields_system_error() {
        let registry = AgentRegistry::new();
        let router = DelegationRouter::new();
        let (prompt, tag) = router.delegate(&registry, "ghost", "do something").await;
        assert_eq!(tag, "SYSTEM_ERROR");
        assert!(prompt.contains("unknown delegation recipient"));
    }
}
