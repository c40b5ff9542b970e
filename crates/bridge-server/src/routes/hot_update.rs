use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;

use crate::state::AppState;

const MACRO_EVENT_KEYS: &[&str] = &["event", "event_name", "impact", "impact_level", "strategic_note", "strategic_rationale"];

fn is_macro_event(payload: &Value) -> bool {
    let Some(obj) = payload.as_object() else {
        return false;
    };
    MACRO_EVENT_KEYS.iter().any(|k| obj.contains_key(*k))
}

async fn hot_update(State(state): State<Arc<AppState>>, Json(payload): Json<Value>) -> Json<Value> {
    let data_dir = state.state_dir.join("Alpha_Data");
    let _ = std::fs::create_dir_all(&data_dir);

    let (target, label) = if is_macro_event(&payload) {
        (data_dir.join("macro_events.json"), "macro_events")
    } else {
        (data_dir.join("portfolio.json"), "portfolio")
    };

    match std::fs::write(&target, serde_json::to_string_pretty(&payload).unwrap_or_default()) {
        Ok(()) => Json(serde_json::json!({"status": "updated", "store": label})),
        Err(e) => Json(serde_json::json!({"status": "error", "message": e.to_string()})),
    }
}

pub fn routes() -> axum::Router<Arc<AppState>> {
    Router::new().route("/api/hot_update", post(hot_update))
}
