//! Tool Loop (§4.4): a fixed closed set of tools invoked by the LLM via a
//! structured directive.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    ListFiles,
    MarketSearch,
    VectorMemory,
    GoogleWorkspace,
    FinancialModel,
    ProduceDocument,
    WriteFile,
    ModifyCode,
}

impl Tool {
    pub const ALL: &'static [Tool] = &[
        Tool::ListFiles,
        Tool::MarketSearch,
        Tool::VectorMemory,
        Tool::GoogleWorkspace,
        Tool::FinancialModel,
        Tool::ProduceDocument,
        Tool::WriteFile,
        Tool::ModifyCode,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Tool::ListFiles => "list_files",
            Tool::MarketSearch => "market_search",
            Tool::VectorMemory => "vector_memory",
            Tool::GoogleWorkspace => "google_workspace",
            Tool::FinancialModel => "financial_model",
            Tool::ProduceDocument => "produce_document",
            Tool::WriteFile => "write_file",
            Tool::ModifyCode => "modify_code",
        }
    }
}

impl FromStr for Tool {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Tool::ALL
            .iter()
            .copied()
            .find(|t| t.name() == lower)
            .ok_or(())
    }
}

/// Tolerantly parse a tool query: it may be a JSON string, an
/// already-decoded JSON value, or plain free text.
pub fn parse_query(raw: &Value) -> Value {
    if let Some(s) = raw.as_str() {
        if let Ok(v) = serde_json::from_str::<Value>(s) {
            return v;
        }
        return Value::String(s.to_string());
    }
    raw.clone()
}

fn query_str(query: &Value, key: &str) -> Option<String> {
    query.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

fn query_as_text(query: &Value) -> String {
    match query {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Executes a tool and returns the observation text. `app_root` anchors
/// relative paths for `list_files` and the deliverables directory for
/// `write_file`/`produce_document`-style artifact materialization.
pub fn execute_tool(tool_name: &str, raw_query: &Value, app_root: &Path, deliverables_dir: &Path) -> String {
    let Ok(tool) = Tool::from_str(tool_name) else {
        let names: Vec<&str> = Tool::ALL.iter().map(|t| t.name()).collect();
        return format!("Unknown tool '{}'. Available tools: {}", tool_name, names.join(", "));
    };

    let query = parse_query(raw_query);

    match tool {
        Tool::ListFiles => {
            let path = query_str(&query, "path").unwrap_or_default();
            let target = if path.is_empty() {
                app_root.to_path_buf()
            } else {
                app_root.join(path)
            };
            list_files_tree(&target)
        }
        Tool::MarketSearch | Tool::VectorMemory | Tool::GoogleWorkspace | Tool::FinancialModel => {
            format!(
                "{} is an external collaborator; query received: {}",
                tool.name(),
                query_as_text(&query)
            )
        }
        Tool::ProduceDocument => {
            format!(
                "produce_document is an external collaborator; query received: {}",
                query_as_text(&query)
            )
        }
        Tool::WriteFile => write_file_tool(&query, deliverables_dir),
        Tool::ModifyCode => modify_code_tool(&query, app_root),
    }
}

fn list_files_tree(dir: &Path) -> String {
    if !dir.exists() {
        return format!("Path does not exist: {}", dir.display());
    }
    let mut entries = Vec::new();
    if let Ok(read_dir) = std::fs::read_dir(dir) {
        for entry in read_dir.flatten() {
            entries.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    entries.sort();
    entries.join("\n")
}

/// Anchor a possibly-relative path under `deliverables_dir`, creating parent
/// directories as needed.
fn anchor_under_deliverables(path: &str, deliverables_dir: &Path) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        deliverables_dir.join(p)
    }
}

fn write_file_tool(query: &Value, deliverables_dir: &Path) -> String {
    let Some(path) = query_str(query, "path") else {
        return "write_file requires a 'path'".to_string();
    };
    let content = query_str(query, "content").unwrap_or_default();
    let target = anchor_under_deliverables(&path, deliverables_dir);

    if let Some(parent) = target.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            return format!("write_file failed to create parent directories: {}", e);
        }
    }
    match std::fs::write(&target, content) {
        Ok(()) => format!("Wrote file: {}", target.display()),
        Err(e) => format!("write_file failed: {}", e),
    }
}

fn modify_code_tool(query: &Value, app_root: &Path) -> String {
    let Some(path) = query_str(query, "path") else {
        return "modify_code requires a 'path'".to_string();
    };
    let Some(search) = query_str(query, "search") else {
        return "modify_code requires a 'search' string".to_string();
    };
    let replace = query_str(query, "replace").unwrap_or_default();

    let target = if Path::new(&path).is_absolute() {
        PathBuf::from(&path)
    } else {
        app_root.join(&path)
    };

    let Ok(content) = std::fs::read_to_string(&target) else {
        return format!("modify_code could not read file: {}", target.display());
    };

    let Some(pos) = content.find(search.as_str()) else {
        return format!("modify_code: search text not found in {}", target.display());
    };

    let mut new_content = String::with_capacity(content.len());
    new_content.push_str(&content[..pos]);
    new_content.push_str(&replace);
    new_content.push_str(&content[pos + search.len()..]);

    match std::fs::write(&target, new_content) {
        Ok(()) => format!("Modified file: {}", target.display()),
        Err(e) => format!("modify_code failed to write: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_names_are_case_insensitive() {
        assert_eq!(Tool::from_str("WRITE_FILE"), Ok(Tool::WriteFile));
        assert_eq!(Tool::from_str("Write_File"), Ok(Tool::WriteFile));
        assert_eq!(Tool::from_str("nonexistent"), Err(()));
    }

    #[test]
    fn parse_query_tolerates_json_string_and_object() {
        assert_eq!(parse_query(&json!("{\"a\":1}")), json!({"a": 1}));
        assert_eq!(parse_query(&json!({"a": 1})), json!({"a": 1}));
        assert_eq!(parse_query(&json!("plain text")), json!("plain text"));
    }

    #[test]
    fn unknown_tool_lists_available_tools() {
        let dir = tempfile::tempdir().unwrap();
        let obs = execute_tool("nope", &json!({}), dir.path(), dir.path());
        assert!(obs.contains("Unknown tool"));
        assert!(obs.contains("list_files"));
        assert!(obs.contains("modify_code"));
    }

    #[test]
    fn write_file_anchors_relative_paths_under_deliverables() {
        let dir = tempfile::tempdir().unwrap();
        let deliverables = dir.path().join("deliverables");
        let obs = execute_tool(
            "write_file",
            &json!({"path": "nested/out.txt", "content": "hello"}),
            dir.path(),
            &deliverables,
        );
        assert!(obs.starts_with("Wrote file:"));
        let written = std::fs::read_to_string(deliverables.join("nested/out.txt")).unwrap();
        assert_eq!(written, "hello");
    }

    #[test]
    fn modify_code_replaces_first_occurrence() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.rs");
        std::fs::write(&file, "fn old_name() {}\nfn old_name() {}").unwrap();

        let obs = execute_tool(
            "modify_code",
            &json!({"path": "a.rs", "search": "old_name", "replace": "new_name"}),
            dir.path(),
            dir.path(),
        );
        assert!(obs.starts_with("Modified file:"));
        let content = std::fs::read_to_string(&file).unwrap();
        assert_eq!(content, "fn new_name() {}\nfn old_name() {}");
    }

    #[test]
    fn modify_code_fails_when_search_absent() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.rs");
        std::fs::write(&file, "fn thing() {}").unwrap();

        let obs = execute_tool(
            "modify_code",
            &json!({"path": "a.rs", "search": "missing", "replace": "x"}),
            dir.path(),
            dir.path(),
        );
        assert!(obs.contains("search text not found"));
    }
}
