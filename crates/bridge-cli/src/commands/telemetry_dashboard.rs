use bridge_core::budget::BudgetGuard;
use bridge_core::config::AppConfig;
use bridge_core::error_log::summary_from;
use bridge_core::model::CircuitState;
use serde_json::json;

fn circuit_states(config: &AppConfig) -> Vec<CircuitState> {
    let Ok(entries) = std::fs::read_dir(&config.circuit_breaker.state_dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|e| std::fs::read(e.path()).ok())
        .filter_map(|bytes| serde_json::from_slice(&bytes).ok())
        .collect()
}

/// Prints a unified view combining circuit breaker status, budget usage, and
/// the error log summary — the single-glance operational snapshot.
pub fn run(config: &AppConfig, as_json: bool) -> i32 {
    let breakers = circuit_states(config);
    let budget = BudgetGuard::new(&config.budget.log_path, config.budget.monthly_limit).history();
    let errors = summary_from(&config.error_log.log_path);

    if as_json {
        println!(
            "{}",
            json!({
                "circuit_breakers": breakers,
                "budget_history": budget,
                "error_summary": errors,
            })
        );
        return 0;
    }

    println!("=== Agent Bridge Telemetry ===");
    println!("Circuit breakers: {}", breakers.len());
    for cb in &breakers {
        println!("  {} — {:?}", cb.name, cb.state);
    }
    println!("Budget samples recorded: {}", budget.len());
    if let Some(latest) = budget.last() {
        println!("  latest: {}/{}", latest.total_executions, latest.monthly_limit);
    }
    println!("Error log total: {}", errors.total);
    0
}
