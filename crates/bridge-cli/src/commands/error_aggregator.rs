use bridge_core::config::AppConfig;
use bridge_core::error_log::{read_recent_from, summary_from};
use bridge_core::model::Severity;

fn parse_severity(s: &str) -> Option<Severity> {
    match s.to_ascii_lowercase().as_str() {
        "info" => Some(Severity::Info),
        "warning" | "warn" => Some(Severity::Warning),
        "error" => Some(Severity::Error),
        "critical" => Some(Severity::Critical),
        _ => None,
    }
}

pub fn run(config: &AppConfig, app: Option<&str>, severity: Option<&str>, n: usize, summary: bool) -> i32 {
    let log_path = &config.error_log.log_path;

    if summary {
        let s = summary_from(log_path);
        println!("Total entries: {}", s.total);
        println!("By app:");
        for (app, count) in &s.by_app {
            println!("  {}: {}", app, count);
        }
        println!("By severity:");
        for (sev, count) in &s.by_severity {
            println!("  {}: {}", sev, count);
        }
        return 0;
    }

    let severity_filter = severity.and_then(parse_severity);
    let entries = read_recent_from(log_path, n, app, severity_filter);
    if entries.is_empty() {
        println!("No matching error log entries.");
        return 0;
    }
    for entry in entries {
        println!("[{}] {} ({}): {}", entry.timestamp, entry.severity, entry.app, entry.message);
    }
    0
}
