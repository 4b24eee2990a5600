use std::sync::Arc;

use axum::Router;

use crate::pipeline::PipelineCounters;

mod health;

// ---

pub fn router(counters: Arc<PipelineCounters>) -> Router {
    // ---
    Router::new().merge(health::router()).with_state(counters)
}
