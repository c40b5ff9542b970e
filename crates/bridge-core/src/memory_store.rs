//! File-backed persistence for the three on-disk state files the Dispatcher
//! reads and writes between process invocations: a bounded chat history, a
//! last-5 prompt ring used for Sentry recovery, and the last active project
//! name used to detect project switches.
//!
//! All I/O failures are swallowed and collapse to empty/default state,
//! matching the bare `try/except: pass` resilience of the original.

use std::path::{Path, PathBuf};

use crate::model::Turn;

/// Bounded per-session chat history, backed by a single JSON file.
#[derive(Debug, Clone)]
pub struct ChatHistoryStore {
    path: PathBuf,
    window_size: usize,
}

impl ChatHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            window_size: 5,
        }
    }

    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn load(&self) -> Vec<Turn> {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Append a turn, keeping at most `2 * window_size` turns.
    pub fn add(&self, role: &str, content: &str) {
        let mut history = self.load();
        history.push(Turn {
            role: role.to_string(),
            content: content.to_string(),
        });
        let cap = self.window_size * 2;
        if history.len() > cap {
            let excess = history.len() - cap;
            history.drain(0..excess);
        }
        let _ = self.save(&history);
    }

    fn save(&self, history: &[Turn]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(history).unwrap_or_default();
        std::fs::write(&self.path, json)
    }

    pub fn clear(&self) {
        let _ = self.save(&[]);
    }

    /// Render history as `--- CHAT HISTORY ---\nROLE: content\n...\n--------------------\n`.
    pub fn context_string(&self) -> String {
        let history = self.load();
        if history.is_empty() {
            return String::new();
        }
        let mut text = String::from("--- CHAT HISTORY ---\n");
        for turn in &history {
            text.push_str(&format!("{}: {}\n", turn.role.to_uppercase(), turn.content));
        }
        text.push_str("--------------------\n");
        text
    }
}

/// Last-5 raw prompt ring used by the Dispatcher's Sentry Level 1 recovery.
#[derive(Debug, Clone)]
pub struct SentryCache {
    path: PathBuf,
}

impl SentryCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Vec<String> {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    pub fn push(&self, prompt: &str) {
        let mut cache = self.load();
        cache.push(prompt.to_string());
        if cache.len() > 5 {
            let excess = cache.len() - 5;
            cache.drain(0..excess);
        }
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = std::fs::write(&self.path, serde_json::to_string(&cache).unwrap_or_default());
    }

    pub fn last(&self) -> Option<String> {
        self.load().last().cloned()
    }
}

/// Tracks the last active project name so the Dispatcher can detect a
/// project switch and trigger a memory wipe. Stored as plain text, not JSON,
/// matching the original's `f.write(new_project)` / `f.read().strip()`.
#[derive(Debug, Clone)]
pub struct ProjectContext {
    path: PathBuf,
}

impl ProjectContext {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> String {
        std::fs::read_to_string(&self.path)
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }

    pub fn save(&self, project_name: &str) {
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = std::fs::write(&self.path, project_name);
    }
}

/// Directory layout for the three state files, anchored under one state
/// directory (`.Gemini_state` in the original).
pub struct StatePaths {
    pub chat_history: PathBuf,
    pub sentry_cache: PathBuf,
    pub project_context: PathBuf,
}

impl StatePaths {
    pub fn under(state_dir: impl AsRef<Path>) -> Self {
        let dir = state_dir.as_ref();
        Self {
            chat_history: dir.join(".chat_history.json"),
            sentry_cache: dir.join(".sentry_cache.json"),
            project_context: dir.join(".project_context.json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_history_bounds_and_renders_context() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChatHistoryStore::new(dir.path().join("h.json")).with_window_size(1);
        store.add("user", "hi");
        store.add("ai", "hello");
        store.add("user", "bye");
        let history = store.load();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hello");

        let text = store.context_string();
        assert!(text.starts_with("--- CHAT HISTORY ---\n"));
        assert!(text.contains("AI: hello"));
    }

    #[test]
    fn chat_history_clear_empties_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChatHistoryStore::new(dir.path().join("h.json"));
        store.add("user", "hi");
        store.clear();
        assert!(store.load().is_empty());
        assert_eq!(store.context_string(), "");
    }

    #[test]
    fn sentry_cache_keeps_last_five() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SentryCache::new(dir.path().join("c.json"));
        for i in 0..8 {
            cache.push(&format!("prompt {}", i));
        }
        assert_eq!(cache.last(), Some("prompt 7".to_string()));
        assert_eq!(cache.load().len(), 5);
        assert_eq!(cache.load()[0], "prompt 3");
    }

    #[test]
    fn project_context_round_trips_plain_text() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ProjectContext::new(dir.path().join("p.txt"));
        assert_eq!(ctx.load(), "");
        ctx.save("Acme_Corp");
        assert_eq!(ctx.load(), "Acme_Corp");
    }

    #[test]
    fn missing_files_yield_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChatHistoryStore::new(dir.path().join("missing.json"));
        assert!(store.load().is_empty());
        let cache = SentryCache::new(dir.path().join("missing.json"));
        assert_eq!(cache.last(), None);
    }
}
