#![allow(dead_code)]

//! Shared setup for tests that need a real PostgreSQL.
//!
//! Point `TEST_DATABASE_URL` at a scratch database. Each test gets its own
//! uuid-suffixed table so tests can run in parallel.

use std::time::Duration;

use sensorflow_telemetry::store::Store;
use sensorflow_telemetry::{Config, Reading};
use uuid::Uuid;

// ---

pub fn test_config(db_url: String) -> Config {
    // ---
    let suffix = Uuid::new_v4().simple().to_string();
    let table_name = format!("readings_{}", &suffix[..12]);

    Config {
        db_url,
        db_name: String::new(),
        change_channel: format!("{}_changes", table_name),
        table_name,
        num_sensors: 20,
        generate_interval: Duration::from_secs(5),
        db_pool_max: 5,
        health_port: 0,
    }
}

/// Store on a fresh, not yet created table; `None` when no database is configured.
pub async fn test_store() -> Option<Store> {
    // ---
    let Ok(db_url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping database test");
        return None;
    };

    let cfg = test_config(db_url);
    let store = Store::connect(&cfg)
        .await
        .expect("failed to connect to TEST_DATABASE_URL");
    Some(store)
}

/// Drop the test table and its notify function.
pub async fn cleanup(store: &Store) {
    // ---
    let names = store.names();
    sqlx::query(&format!(r#"DROP TABLE IF EXISTS "{}""#, names.table))
        .execute(store.pool())
        .await
        .expect("drop table");
    sqlx::query(&format!(r#"DROP FUNCTION IF EXISTS "{}"()"#, names.notify_fn))
        .execute(store.pool())
        .await
        .expect("drop function");
}

pub fn reading(sensor_id: i32, temp: i32, wind_speed: i32, rel_humidity: i32, co2: i32) -> Reading {
    Reading {
        sensor_id,
        temp,
        wind_speed,
        rel_humidity,
        co2,
    }
}

pub fn temp_reading(sensor_id: i32, temp: i32) -> Reading {
    reading(sensor_id, temp, 20, 50, 1000)
}
