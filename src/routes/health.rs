// src/routes/health.rs
//! Health check endpoint for the telemetry pipeline.
//!
//! Serves `/health` for container orchestrators and CI. The response
//! carries the pipeline's running counters so an operator can see that
//! generator ticks and aggregations are happening. It is a sibling module
//! in the `routes` directory and follows the Explicit Module Boundary
//! Pattern (EMBP): the gateway (`mod.rs`) merges this subrouter and
//! `main.rs` never sees individual endpoints.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::pipeline::{CounterSnapshot, PipelineCounters};

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(flatten)]
    counters: CounterSnapshot,
}

/// Handle `GET /health`.
///
/// Reads the in-memory counters only; never touches the database.
async fn health(State(counters): State<Arc<PipelineCounters>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        counters: counters.snapshot(),
    })
}

/// Create a subrouter containing the `/health` route.
pub fn router() -> Router<Arc<PipelineCounters>> {
    Router::new().route("/health", get(health))
}
