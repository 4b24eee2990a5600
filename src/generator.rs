//! Synthetic reading generator.
//!
//! One invocation per timer tick: draw a reading for every sensor of the
//! fleet, make sure the table exists, write the batch in one transaction.

use rand::Rng;
use tracing::info;

use crate::store::{Provisioning, Store, StoreResult};
use crate::{Metric, Reading};

// ---

/// Timer signal handed to each generator invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimerTick {
    /// The tick fired more than one period after it was scheduled.
    pub past_due: bool,
}

/// What one generator invocation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationOutcome {
    // ---
    pub readings_written: u64,
    pub table_created: bool,
}

/// Draw one reading per sensor id in `0..num_sensors`.
///
/// Every metric is drawn independently and uniformly from its inclusive
/// range.
pub fn generate_readings<R: Rng>(rng: &mut R, num_sensors: i32) -> Vec<Reading> {
    // ---
    (0..num_sensors)
        .map(|sensor_id| Reading {
            sensor_id,
            temp: rng.random_range(Metric::Temp.range()),
            wind_speed: rng.random_range(Metric::WindSpeed.range()),
            rel_humidity: rng.random_range(Metric::RelHumidity.range()),
            co2: rng.random_range(Metric::Co2.range()),
        })
        .collect()
}

/// Run one generator invocation against the store.
///
/// Any store error propagates; the next tick is the retry.
pub async fn generate_sensor_readings(
    store: &Store,
    tick: TimerTick,
    num_sensors: i32,
) -> StoreResult<GenerationOutcome> {
    // ---
    if tick.past_due {
        info!("The timer is past due!");
    }

    let readings = {
        let mut rng = rand::rng();
        generate_readings(&mut rng, num_sensors)
    };
    info!("Generated {} readings.", readings.len());

    let mut session = store.session().await?;
    let provisioning = session.ensure_table().await?;
    let readings_written = session.insert_readings(&readings).await?;

    info!(
        "Stored {} readings in {}",
        readings_written,
        store.names().table
    );

    Ok(GenerationOutcome {
        readings_written,
        table_created: provisioning == Provisioning::Created,
    })
}
