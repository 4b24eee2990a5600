//! Two-stage sensor telemetry pipeline.
//!
//! A timer-driven generator writes synthetic readings into a PostgreSQL
//! table it provisions on first use; a change-driven aggregator rebuilds
//! per-sensor min/max/average statistics whenever new readings land. The
//! two halves share nothing but the table.
//!
//! Module layout follows the Explicit Module Boundary Pattern (EMBP): each
//! module exposes a small surface and the shared types are re-exported
//! here, so siblings import from the crate root rather than from each
//! other's internals.

pub mod aggregator;
pub mod config;
pub mod generator;
pub mod models;
pub mod pipeline;
pub mod routes;
pub mod store;

pub use config::Config;
pub use models::{Metric, MetricStats, Reading, StatsReport};
