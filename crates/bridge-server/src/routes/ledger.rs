use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use bridge_core::budget::BudgetGuard;
use bridge_core::error_log::read_recent_from;
use serde_json::{json, Value};

use crate::state::AppState;

fn budget_log_path(state: &AppState) -> std::path::PathBuf {
    state.config.budget.log_path.clone()
}

async fn ledger(State(state): State<Arc<AppState>>) -> Json<Value> {
    let guard = BudgetGuard::new(budget_log_path(&state), state.config.budget.monthly_limit);
    Json(json!({"samples": guard.history()}))
}

/// Out of core scope per the interface; returns the freshly-read ledger so
/// callers have something to diff against after triggering a refresh.
async fn ledger_refresh(State(state): State<Arc<AppState>>) -> Json<Value> {
    let guard = BudgetGuard::new(budget_log_path(&state), state.config.budget.monthly_limit);
    Json(json!({"status": "refreshed", "samples": guard.history()}))
}

async fn journal(State(state): State<Arc<AppState>>) -> Json<Value> {
    let entries = read_recent_from(&state.config.error_log.log_path, 50, None, None);
    Json(json!({"entries": entries}))
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/ledger", get(ledger))
        .route("/api/ledger/refresh", post(ledger_refresh))
        .route("/api/journal", get(journal))
}
