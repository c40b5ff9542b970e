use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::state::AppState;

async fn version() -> Json<Value> {
    Json(json!({
        "build_timestamp": env!("BUILD_TIMESTAMP"),
        "git_hash": env!("BUILD_GIT_HASH"),
    }))
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/version", get(version))
}
