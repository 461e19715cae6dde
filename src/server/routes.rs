use std::sync::Arc;

use axum::Router;
use axum::routing::get;

use crate::server::AppState;
use crate::server::handler;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/-/search", get(handler::search))
        .route("/*path", get(handler::package))
        .with_state(state)
}
