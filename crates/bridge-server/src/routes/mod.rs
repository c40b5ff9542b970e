pub mod chat;
pub mod execute;
pub mod hot_update;
pub mod ledger;
pub mod meta;
pub mod version;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(execute::routes())
        .merge(hot_update::routes())
        .merge(chat::routes())
        .merge(meta::routes())
        .merge(ledger::routes())
        .merge(version::routes())
        .with_state(state)
}
