//! Streaming Channel (§4.6): SSE-driven chat against a streaming LLM
//! endpoint, with a model fallback chain, a system prompt enriched by live
//! dashboard state and local strategy files, and a bounded on-disk history
//! distinct from the Dispatcher's own chat history.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::model::Turn;

const BASE_SYSTEM_PROMPT: &str = "\
You are Alpha Architect, a Lead Quant Analyst for the Alpha V2 Genesis \
trading system. You specialize in SPX Iron Condor strategies, options \
Greeks, volatility analysis, and market risk management.\n\n\
You provide concise, actionable insights. When discussing trades, \
reference specific strikes, deltas, DTE, and credit amounts. \
Use professional but approachable language. Format responses with \
markdown when helpful (bold, lists, headers).\n\n\
You have access to real-time market data via the Alpha system. \
If a user asks about current market conditions, provide analysis based \
on your training knowledge and note that live data is available on the \
dashboard.";

const MODEL_FALLBACK_CHAIN: &[(&str, &str)] = &[
    ("gemini-2.5-flash", "v1beta"),
    ("gemini-2.0-flash", "v1beta"),
    ("gemini-2.0-flash-lite", "v1beta"),
];

const MAX_HISTORY_TURNS: usize = 6;
const LOCAL_FILE_BYTE_CAP: usize = 4000;

#[derive(Debug, Clone)]
pub enum StreamEvent {
    Text(String),
    Done,
    Error(String),
}

pub struct StreamingChannel {
    client: reqwest::Client,
    history_path: PathBuf,
    local_context_files: Vec<PathBuf>,
}

impl StreamingChannel {
    pub fn new(state_dir: impl AsRef<Path>, local_context_files: Vec<PathBuf>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .expect("failed to build streaming HTTP client"),
            history_path: state_dir.as_ref().join(".stream_history.json"),
            local_context_files,
        }
    }

    fn load_history(&self) -> Vec<Turn> {
        let history: Vec<Turn> = std::fs::read_to_string(&self.history_path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        let cap = MAX_HISTORY_TURNS * 2;
        if history.len() > cap {
            history[history.len() - cap..].to_vec()
        } else {
            history
        }
    }

    fn append_history(&self, prompt: &str, response: &str) {
        let mut history = self.load_history();
        history.push(Turn {
            role: "user".to_string(),
            content: prompt.to_string(),
        });
        history.push(Turn {
            role: "assistant".to_string(),
            content: response.to_string(),
        });
        let cap = MAX_HISTORY_TURNS * 2;
        if history.len() > cap {
            let excess = history.len() - cap;
            history.drain(0..excess);
        }
        if let Some(parent) = self.history_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = std::fs::write(&self.history_path, serde_json::to_string_pretty(&history).unwrap_or_default());
    }

    pub fn clear_history(&self) {
        let _ = std::fs::write(&self.history_path, "[]");
    }

    fn load_local_files(&self) -> String {
        let mut snippets = Vec::new();
        for path in &self.local_context_files {
            if let Ok(content) = std::fs::read_to_string(path) {
                let truncated: String = content.chars().take(LOCAL_FILE_BYTE_CAP).collect();
                snippets.push(format!("--- {} ---\n{}", path.display(), truncated));
            }
        }
        snippets.join("\n\n")
    }

    fn build_system_prompt(&self, dashboard_context: Option<&Value>) -> String {
        let mut parts = vec![BASE_SYSTEM_PROMPT.to_string()];
        if let Some(ctx) = dashboard_context {
            parts.push("\n\n--- LIVE DASHBOARD STATE (real-time from UI) ---".to_string());
            parts.push(serde_json::to_string_pretty(ctx).unwrap_or_default());
        }
        let local_files = self.load_local_files();
        if !local_files.is_empty() {
            parts.push("\n\n--- LOCAL STRATEGY FILES ---".to_string());
            parts.push(local_files);
        }
        parts.join("\n")
    }

    /// Stream a chat turn, emitting `StreamEvent`s on `tx` as chunks arrive
    /// and a final `Done`/`Error`. Tries each model in the fallback chain in
    /// order, using the first that returns HTTP 200.
    pub async fn stream_chat(&self, prompt: &str, api_key: &str, dashboard_context: Option<Value>, tx: mpsc::Sender<StreamEvent>) {
        if api_key.trim().is_empty() {
            let _ = tx
                .send(StreamEvent::Error(
                    "GEMINI_API_KEY not found in vault or environment. Cannot stream.".to_string(),
                ))
                .await;
            return;
        }

        let history = self.load_history();
        let system_prompt = self.build_system_prompt(dashboard_context.as_ref());

        let mut contents = vec![
            serde_json::json!({
                "role": "user",
                "parts": [{"text": format!("{}\n\nConversation begins now.", system_prompt)}]
            }),
            serde_json::json!({
                "role": "model",
                "parts": [{"text": "Understood. I'm Alpha Architect, ready to assist with your trading analysis. I can see the live dashboard data. How can I help?"}]
            }),
        ];
        for turn in &history {
            let role = if turn.role == "user" { "user" } else { "model" };
            contents.push(serde_json::json!({"role": role, "parts": [{"text": turn.content}]}));
        }
        contents.push(serde_json::json!({"role": "user", "parts": [{"text": prompt}]}));

        let payload = serde_json::json!({
            "contents": contents,
            "generationConfig": {"temperature": 0.7, "maxOutputTokens": 4096},
        });

        let mut response = None;
        let mut last_error = String::new();
        for (model, api_version) in MODEL_FALLBACK_CHAIN {
            let url = format!(
                "https://generativelanguage.googleapis.com/{}/models/{}:streamGenerateContent?alt=sse&key={}",
                api_version, model, api_key
            );
            match self.client.post(&url).json(&payload).send().await {
                Ok(resp) if resp.status().is_success() => {
                    response = Some(resp);
                    break;
                }
                Ok(resp) => {
                    last_error = resp.text().await.unwrap_or_default();
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }
        }

        let Some(response) = response else {
            let preview: String = last_error.chars().take(300).collect();
            let _ = tx.send(StreamEvent::Error(format!("Gemini API error: {}", preview))).await;
            return;
        };

        let mut full_response = String::new();
        let mut buffer = String::new();
        let mut byte_stream = response.bytes_stream();

        while let Some(chunk) = byte_stream.next().await {
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    let _ = tx.send(StreamEvent::Error(format!("Streaming failed: {}", e))).await;
                    return;
                }
            };
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(newline_pos) = buffer.find('\n') {
                let line = buffer[..newline_pos].trim().to_string();
                buffer.drain(..=newline_pos);
                if line.is_empty() {
                    continue;
                }
                let Some(json_str) = line.strip_prefix("data: ") else {
                    continue;
                };
                let Ok(chunk_data) = serde_json::from_str::<Value>(json_str) else {
                    continue;
                };
                if let Some(text) = extract_candidate_text(&chunk_data) {
                    if !text.is_empty() {
                        full_response.push_str(&text);
                        if tx.send(StreamEvent::Text(text)).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }

        if !full_response.is_empty() {
            self.append_history(prompt, &full_response);
        }
        let _ = tx.send(StreamEvent::Done).await;
    }

    /// Non-streaming convenience wrapper over `stream_chat`: drains every
    /// chunk into one string instead of forwarding them as they arrive.
    /// For callers (e.g. a CLI) that have no use for incremental output.
    pub async fn chat_sync(&self, prompt: &str, api_key: &str, dashboard_context: Option<Value>) -> Result<String, String> {
        let (tx, mut rx) = mpsc::channel(32);
        let stream_fut = self.stream_chat(prompt, api_key, dashboard_context, tx);
        let drain_fut = async {
            let mut full = String::new();
            while let Some(event) = rx.recv().await {
                match event {
                    StreamEvent::Text(t) => full.push_str(&t),
                    StreamEvent::Done => return Ok(full),
                    StreamEvent::Error(e) => return Err(e),
                }
            }
            Ok(full)
        };
        let (_, result) = tokio::join!(stream_fut, drain_fut);
        result
    }
}

fn extract_candidate_text(chunk: &Value) -> Option<String> {
    let candidate = chunk.get("candidates")?.as_array()?.first()?;
    let parts = candidate.get("content")?.get("parts")?.as_array()?;
    let mut text = String::new();
    for part in parts {
        if let Some(t) = part.get("text").and_then(|t| t.as_str()) {
            text.push_str(t);
        }
    }
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_api_key_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let channel = StreamingChannel::new(dir.path(), vec![]);
            let (tx, mut rx) = mpsc::channel(4);
            channel.stream_chat("hi", "", None, tx).await;
            match rx.recv().await {
                Some(StreamEvent::Error(msg)) => assert!(msg.contains("GEMINI_API_KEY")),
                other => panic!("expected error event, got {:?}", other.is_some()),
            }
        });
    }

    #[test]
    fn extract_candidate_text_concatenates_parts() {
        let chunk = serde_json::json!({
            "candidates": [{
                "content": {"parts": [{"text": "hello "}, {"text": "world"}]}
            }]
        });
        assert_eq!(extract_candidate_text(&chunk), Some("hello world".to_string()));
    }

    #[test]
    fn extract_candidate_text_none_without_candidates() {
        assert_eq!(extract_candidate_text(&serde_json::json!({})), None);
    }

    #[test]
    fn history_round_trips_and_bounds_to_max_turns() {
        let dir = tempfile::tempdir().unwrap();
        let channel = StreamingChannel::new(dir.path(), vec![]);
        for i in 0..10 {
            channel.append_history(&format!("q{}", i), &format!("a{}", i));
        }
        let history = channel.load_history();
        assert_eq!(history.len(), MAX_HISTORY_TURNS * 2);
        assert_eq!(history.last().unwrap().content, "a9");
    }

    #[test]
    fn clear_history_empties_file() {
        let dir = tempfile::tempdir().unwrap();
        let channel = StreamingChannel::new(dir.path(), vec![]);
        channel.append_history("q", "a");
        channel.clear_history();
        assert!(channel.load_history().is_empty());
    }

    #[test]
    fn system_prompt_includes_dashboard_context_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let channel = StreamingChannel::new(dir.path(), vec![]);
        let prompt = channel.build_system_prompt(Some(&serde_json::json!({"pnl": 1200})));
        assert!(prompt.contains("LIVE DASHBOARD STATE"));
        assert!(prompt.contains("1200"));
    }

    #[tokio::test]
    async fn chat_sync_surfaces_missing_key_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let channel = StreamingChannel::new(dir.path(), vec![]);
        let result = channel.chat_sync("hi", "", None).await;
        assert!(result.unwrap_err().contains("GEMINI_API_KEY"));
    }
}
