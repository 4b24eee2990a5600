//! Pipeline coordinator.
//!
//! Two independent loops share nothing but the store:
//! - a fixed-period timer that spawns one generator invocation per tick
//! - a `LISTEN` subscription that spawns one aggregator invocation per
//!   change notification
//!
//! Invocations run as their own tasks and may overlap. Failures are logged
//! and counted; the next tick or notification is the retry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sqlx::postgres::PgListener;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info_span, warn, Instrument};
use uuid::Uuid;

use crate::aggregator::{analyse_sensor_readings, ChangeEvent};
use crate::generator::{generate_sensor_readings, GenerationOutcome, TimerTick};
use crate::store::Store;

// ---

/// Running totals reported by `/health`.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    // ---
    generator_runs: AtomicU64,
    readings_written: AtomicU64,
    aggregations: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time copy of [`PipelineCounters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub generator_runs: u64,
    pub readings_written: u64,
    pub aggregations: u64,
    pub failures: u64,
}

impl PipelineCounters {
    // ---
    pub fn record_generation(&self, outcome: &GenerationOutcome) {
        self.generator_runs.fetch_add(1, Ordering::Relaxed);
        self.readings_written
            .fetch_add(outcome.readings_written, Ordering::Relaxed);
    }

    pub fn record_aggregation(&self) {
        self.aggregations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            generator_runs: self.generator_runs.load(Ordering::Relaxed),
            readings_written: self.readings_written.load(Ordering::Relaxed),
            aggregations: self.aggregations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Whether a tick scheduled `late_by` ago counts as overdue for `period`.
pub fn is_past_due(late_by: Duration, period: Duration) -> bool {
    late_by > period
}

/// Spawn a generator invocation every `period`, the first one immediately.
pub async fn run_generator_schedule(
    store: Arc<Store>,
    period: Duration,
    num_sensors: i32,
    counters: Arc<PipelineCounters>,
) {
    // ---
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let scheduled = interval.tick().await;
        let tick = TimerTick {
            past_due: is_past_due(scheduled.elapsed(), period),
        };

        let store = Arc::clone(&store);
        let counters = Arc::clone(&counters);
        let span = info_span!("generate", invocation = %Uuid::new_v4());

        tokio::spawn(
            async move {
                match generate_sensor_readings(&store, tick, num_sensors).await {
                    Ok(outcome) => counters.record_generation(&outcome),
                    Err(e) => {
                        counters.record_failure();
                        error!("Reading generation failed: {}", e);
                    }
                }
            }
            .instrument(span),
        );
    }
}

/// Spawn an aggregator invocation for every notification `listener`
/// receives. Subscribe with [`Store::listen`] before the first generator
/// tick so the first batch is seen.
pub async fn run_change_listener(
    store: Arc<Store>,
    mut listener: PgListener,
    counters: Arc<PipelineCounters>,
) {
    // ---
    loop {
        match listener.recv().await {
            Ok(notification) => {
                debug!(
                    channel = notification.channel(),
                    "Change notification received"
                );
            }
            Err(e) => {
                // The listener reconnects on the next recv()
                warn!("Change listener error: {}", e);
                time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        }

        let store = Arc::clone(&store);
        let counters = Arc::clone(&counters);
        let span = info_span!("aggregate", invocation = %Uuid::new_v4());

        tokio::spawn(
            async move {
                match analyse_sensor_readings(&store, ChangeEvent).await {
                    Ok(Some(_)) => counters.record_aggregation(),
                    Ok(None) => {}
                    Err(e) => {
                        counters.record_failure();
                        error!("Stats aggregation failed: {}", e);
                    }
                }
            }
            .instrument(span),
        );
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_past_due_threshold() {
        // ---
        let period = Duration::from_secs(5);
        assert!(!is_past_due(Duration::ZERO, period));
        assert!(!is_past_due(Duration::from_millis(4_999), period));
        assert!(!is_past_due(period, period));
        assert!(is_past_due(Duration::from_millis(5_001), period));
    }

    #[test]
    fn test_counters_accumulate() {
        // ---
        let counters = PipelineCounters::default();
        let outcome = GenerationOutcome {
            readings_written: 20,
            table_created: true,
        };

        counters.record_generation(&outcome);
        counters.record_generation(&outcome);
        counters.record_aggregation();
        counters.record_failure();

        assert_eq!(
            counters.snapshot(),
            CounterSnapshot {
                generator_runs: 2,
                readings_written: 40,
                aggregations: 1,
                failures: 1,
            }
        );
    }
}
