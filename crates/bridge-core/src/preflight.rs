//! Preflight Check (§4.12): validates the environment before an app
//! launches — env keys, N8N connectivity, Docker, critical files, and port
//! availability, grouped into profiles per app type.

use std::net::TcpListener;
use std::path::Path;
use std::time::Duration;

const PLACEHOLDER_VALUES: &[&str] = &["YOUR_KEY_HERE", "YOUR_WEBHOOK_URL_HERE", "PLACEHOLDER"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone)]
pub struct CheckResult {
    pub status: CheckStatus,
    pub message: String,
}

impl CheckResult {
    fn pass(message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Pass,
            message: message.into(),
        }
    }
    fn warn(message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Warn,
            message: message.into(),
        }
    }
    fn fail(message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Fail,
            message: message.into(),
        }
    }
}

/// Verify required env keys are present, non-empty, and not left as
/// placeholder values. `env_path` is parsed manually as `KEY=VALUE` lines
/// (matching the original's pre-dotenv-load manual parse); falls back to
/// process environment when no `.env` is given.
pub fn check_env_keys(required_keys: &[&str], env_path: Option<&Path>) -> Vec<CheckResult> {
    let env_vars: std::collections::HashMap<String, String> = match env_path {
        Some(path) => {
            let Ok(content) = std::fs::read_to_string(path) else {
                return vec![CheckResult::fail(format!(".env file not found: {}", path.display()))];
            };
            content
                .lines()
                .filter_map(|line| {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') || !line.contains('=') {
                        return None;
                    }
                    let (k, v) = line.split_once('=')?;
                    Some((k.trim().to_string(), v.trim().to_string()))
                })
                .collect()
        }
        None => std::env::vars().collect(),
    };

    required_keys
        .iter()
        .map(|key| {
            let val = env_vars
                .get(*key)
                .cloned()
                .or_else(|| std::env::var(key).ok())
                .unwrap_or_default();
            if val.is_empty() || val.starts_with("${") {
                CheckResult::fail(format!("Missing or empty: {}", key))
            } else if PLACEHOLDER_VALUES.contains(&val.as_str()) {
                CheckResult::warn(format!("Placeholder value: {}", key))
            } else {
                let preview: String = val.chars().take(20).collect();
                CheckResult::pass(format!("{} = {}...", key, preview))
            }
        })
        .collect()
}

/// Verify a critical file exists.
pub fn check_file_exists(path: &Path, label: &str) -> CheckResult {
    match std::fs::metadata(path) {
        Ok(meta) => CheckResult::pass(format!("{} ({} bytes)", label, meta.len())),
        Err(_) => CheckResult::fail(format!("{} NOT FOUND: {}", label, path.display())),
    }
}

/// Check whether a TCP port is free to bind on localhost.
pub fn check_port_available(port: u16) -> CheckResult {
    match TcpListener::bind(("127.0.0.1", port)) {
        Ok(_) => CheckResult::pass(format!("Port {} is available", port)),
        Err(_) => CheckResult::warn(format!("Port {} already in use (existing instance?)", port)),
    }
}

/// Check whether the Docker daemon responds to `docker info`.
pub fn check_docker() -> CheckResult {
    match std::process::Command::new("docker")
        .arg("info")
        .output()
    {
        Ok(out) if out.status.success() => CheckResult::pass("Docker Engine is running"),
        Ok(_) => CheckResult::warn("Docker is installed but not running"),
        Err(_) => CheckResult::warn("Docker not installed (not required for all apps)"),
    }
}

/// Check N8N API reachability with the given API key.
pub async fn check_n8n_connectivity(api_key: Option<&str>) -> CheckResult {
    let Some(api_key) = api_key.filter(|k| !k.is_empty()) else {
        return CheckResult::fail("N8N_API_KEY not available — cannot check connectivity");
    };

    let client = match reqwest::Client::builder().timeout(Duration::from_secs(10)).build() {
        Ok(c) => c,
        Err(e) => return CheckResult::fail(format!("N8N connection failed: {}", e)),
    };

    match client
        .get("https://humanresource.app.n8n.cloud/api/v1/workflows?limit=1")
        .header("X-N8N-API-KEY", api_key)
        .send()
        .await
    {
        Ok(resp) if resp.status().as_u16() == 200 => {
            let count = resp
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v.get("data").and_then(|d| d.as_array()).map(|a| a.len()))
                .unwrap_or(0);
            CheckResult::pass(format!("N8N API reachable — {}+ workflows found", count))
        }
        Ok(resp) if resp.status().as_u16() == 401 => {
            CheckResult::fail("N8N API key is invalid (401 Unauthorized)")
        }
        Ok(resp) => CheckResult::warn(format!("N8N API returned HTTP {}", resp.status().as_u16())),
        Err(e) => CheckResult::fail(format!("N8N connection failed: {}", e)),
    }
}

/// One critical file requirement: a human label and a path relative to the
/// app directory.
#[derive(Debug, Clone)]
pub struct CriticalFile {
    pub label: &'static str,
    pub filename: &'static str,
}

#[derive(Debug, Clone)]
pub struct Profile {
    pub name: &'static str,
    pub env_keys: &'static [&'static str],
    pub check_docker: bool,
    pub check_port: Option<u16>,
    pub critical_files: &'static [CriticalFile],
}

pub const PROFILE_ALPHA: Profile = Profile {
    name: "Alpha V2 Genesis",
    env_keys: &["NGROK_AUTH_TOKEN", "N8N_API_KEY", "WEBHOOK_URL"],
    check_docker: false,
    check_port: Some(5005),
    critical_files: &[
        CriticalFile { label: "server.py", filename: "server.py" },
        CriticalFile { label: "n8n_lifecycle.py", filename: "n8n_lifecycle.py" },
    ],
};

pub const PROFILE_META: Profile = Profile {
    name: "Meta App Factory",
    env_keys: &["N8N_API_KEY"],
    check_docker: true,
    check_port: Some(8000),
    critical_files: &[],
};

pub const PROFILE_GENERIC: Profile = Profile {
    name: "Generic App",
    env_keys: &["N8N_API_KEY", "WEBHOOK_URL"],
    check_docker: false,
    check_port: None,
    critical_files: &[CriticalFile { label: "config.json", filename: "config.json" }],
};

pub fn profile_by_name(name: &str) -> &'static Profile {
    match name {
        "alpha" => &PROFILE_ALPHA,
        "meta" => &PROFILE_META,
        _ => &PROFILE_GENERIC,
    }
}

fn read_n8n_api_key_from_env_file(env_path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(env_path).ok()?;
    content.lines().find_map(|line| {
        let line = line.trim();
        line.strip_prefix("N8N_API_KEY=").map(|v| v.to_string())
    })
}

/// Run every check in `profile` against `app_dir`. Returns (passed, failed, warned) counts.
pub async fn run_preflight(profile: &Profile, app_dir: &Path) -> (usize, usize, usize) {
    let env_path = app_dir.join(".env");
    let env_path_opt = env_path.exists().then_some(env_path.as_path());

    let mut results = check_env_keys(profile.env_keys, env_path_opt);

    // Rust binaries have their dependency graph resolved and embedded at
    // build time, so there is no import-time equivalent of the original's
    // per-package `importlib.import_module` probe. The closest analog is
    // whether the workspace has a locked, reproducible dependency graph.
    if !app_dir.join("Cargo.lock").exists() {
        results.push(CheckResult::warn("No Cargo.lock found — dependency graph is unresolved"));
    } else {
        results.push(CheckResult::pass("Cargo.lock present"));
    }

    let api_key = read_n8n_api_key_from_env_file(&env_path).or_else(|| std::env::var("N8N_API_KEY").ok());
    results.push(check_n8n_connectivity(api_key.as_deref()).await);

    if profile.check_docker {
        results.push(check_docker());
    }

    for cf in profile.critical_files {
        results.push(check_file_exists(&app_dir.join(cf.filename), cf.label));
    }

    if let Some(port) = profile.check_port {
        results.push(check_port_available(port));
    }

    let passed = results.iter().filter(|r| r.status == CheckStatus::Pass).count();
    let warned = results.iter().filter(|r| r.status == CheckStatus::Warn).count();
    let failed = results.iter().filter(|r| r.status == CheckStatus::Fail).count();
    (passed, failed, warned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_fails() {
        let results = check_env_keys(&["SOME_TOTALLY_ABSENT_KEY_XYZ"], None);
        assert_eq!(results[0].status, CheckStatus::Fail);
    }

    #[test]
    fn placeholder_value_warns() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join(".env");
        std::fs::write(&env_path, "WEBHOOK_URL=YOUR_WEBHOOK_URL_HERE\n").unwrap();
        let results = check_env_keys(&["WEBHOOK_URL"], Some(&env_path));
        assert_eq!(results[0].status, CheckStatus::Warn);
    }

    #[test]
    fn real_value_passes() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join(".env");
        std::fs::write(&env_path, "WEBHOOK_URL=https://example.test/webhook/abc\n").unwrap();
        let results = check_env_keys(&["WEBHOOK_URL"], Some(&env_path));
        assert_eq!(results[0].status, CheckStatus::Pass);
    }

    #[test]
    fn missing_env_file_fails_outright() {
        let dir = tempfile::tempdir().unwrap();
        let results = check_env_keys(&["X"], Some(&dir.path().join("missing.env")));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, CheckStatus::Fail);
    }

    #[test]
    fn file_exists_check() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("server.py");
        std::fs::write(&file, "print(1)").unwrap();
        assert_eq!(check_file_exists(&file, "server.py").status, CheckStatus::Pass);
        assert_eq!(check_file_exists(&dir.path().join("missing.py"), "missing.py").status, CheckStatus::Fail);
    }

    #[test]
    fn port_check_detects_bound_port() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert_eq!(check_port_available(port).status, CheckStatus::Warn);
        drop(listener);
        assert_eq!(check_port_available(port).status, CheckStatus::Pass);
    }

    #[test]
    fn profile_lookup_falls_back_to_generic() {
        assert_eq!(profile_by_name("alpha").name, "Alpha V2 Genesis");
        assert_eq!(profile_by_name("nonsense").name, "Generic App");
    }

    #[tokio::test]
    async fn n8n_connectivity_fails_without_key() {
        let result = check_n8n_connectivity(None).await;
        assert_eq!(result.status, CheckStatus::Fail);
    }
}
