use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use bridge_core::dispatcher::DispatchInput;
use serde::Deserialize;
use serde_json::json;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    task: String,
}

/// Runs `task` through the Dispatcher directly rather than forking a
/// supervisor subprocess — the Supervisor Loop is a long-lived task owned by
/// `bridge-conductor`, not something this endpoint spawns per request.
async fn execute(State(state): State<Arc<AppState>>, Json(req): Json<ExecuteRequest>) -> Json<serde_json::Value> {
    let output = state.dispatcher.dispatch(DispatchInput::new(req.task)).await;
    Json(json!({"status": "completed", "output": output}))
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/execute", post(execute))
}
