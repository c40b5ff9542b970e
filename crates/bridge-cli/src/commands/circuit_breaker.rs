use bridge_core::config::AppConfig;
use bridge_core::model::CircuitState;

/// Prints the status of every persisted circuit breaker as a table.
pub fn run(config: &AppConfig) -> i32 {
    let dir = &config.circuit_breaker.state_dir;
    let Ok(entries) = std::fs::read_dir(dir) else {
        println!("No circuit breaker state found at {}", dir.display());
        return 0;
    };

    println!("{:<24} {:<10} {:>10} {:>10} {:>12} {:>12}", "NAME", "STATE", "CONS_FAIL", "CONS_OK", "TOT_FAIL", "TOT_OK");
    for entry in entries.flatten() {
        let Ok(bytes) = std::fs::read(entry.path()) else {
            continue;
        };
        let Ok(state) = serde_json::from_slice::<CircuitState>(&bytes) else {
            continue;
        };
        println!(
            "{:<24} {:<10?} {:>10} {:>10} {:>12} {:>12}",
            state.name, state.state, state.consecutive_failures, state.consecutive_successes, state.total_failures, state.total_successes
        );
    }
    0
}
