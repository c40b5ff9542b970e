use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::state::AppState;

async fn commands() -> Json<Value> {
    Json(json!([
        "execute", "hot_update", "chat/stream", "chat/clear", "agents/status", "registry", "health"
    ]))
}

async fn agents_status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let webhook = state.dispatcher.current_webhook_url().await;
    Json(json!({"webhook_url": webhook, "brand_tokens": state.config.supervisor.brand_tokens}))
}

async fn registry(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({"agents": state.registry.roles()}))
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/commands", get(commands))
        .route("/api/agents/status", get(agents_status))
        .route("/api/registry", get(registry))
        .route("/api/health", get(health))
}
