//! Change-triggered statistics over the reading history.

use tracing::info;

use crate::store::{Store, StoreResult};
use crate::{Metric, StatsReport};

// ---

/// Arrival of a change notification. The payload is not inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangeEvent;

/// Rebuild the statistics report from the current table contents.
///
/// Returns `Ok(None)` when the table does not exist yet, which happens if a
/// notification races ahead of the first generator run. Every aggregate is
/// read from the same snapshot and computed by the store.
pub async fn analyse_sensor_readings(
    store: &Store,
    _event: ChangeEvent,
) -> StoreResult<Option<StatsReport>> {
    // ---
    let mut session = store.session().await?;

    if !session.table_exists().await? {
        info!("No sensor readings available.");
        return Ok(None);
    }

    let mut snapshot = session.snapshot().await?;
    let sensors_in_use = snapshot.sensor_ids().await?;

    let mut report = StatsReport::new();
    for sensor_id in sensors_in_use {
        for metric in Metric::ALL {
            if let Some(stats) = snapshot.query_aggregate(sensor_id, metric).await? {
                report.insert(sensor_id, metric, stats);
            }
        }
    }
    snapshot.finish().await?;

    info!(sensors = report.sensors.len(), "Stats created.");
    match serde_json::to_string(&report) {
        Ok(json) => info!(report = %json, "Sensor stats"),
        Err(e) => info!("Sensor stats: {:?} ({})", report, e),
    }

    Ok(Some(report))
}
