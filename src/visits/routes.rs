use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::storage::Storage;

use super::handlers::{index, VisitState};

pub fn create_visit_router(storage: Arc<dyn Storage>) -> Router {
    let state = Arc::new(VisitState { storage });

    Router::new()
        .route("/", get(index))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
