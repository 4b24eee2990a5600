//! Application entry point for the `sensorflow-telemetry` pipeline.
//!
//! This binary orchestrates the full startup sequence, including:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Establishing a PostgreSQL connection pool and checking the database name
//! - Starting the reading generator timer and the change listener
//! - Serving the `/health` endpoint via the `routes` gateway (EMBP pattern)
//!
//! # Environment Variables
//! - `DATABASE_URL`, `DATABASE_NAME`, `READINGS_TABLE` (**required**)
//! - `CHANGE_CHANNEL`, `NUM_SENSORS`, `GENERATE_INTERVAL_SECS`,
//!   `DB_POOL_MAX`, `HEALTH_PORT` (optional, see `config`)
//! - `SENSORFLOW_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `SENSORFLOW_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! The table itself is not created here: the first generator invocation
//! that finds it missing provisions it.
use std::{env, future::IntoFuture, net::SocketAddr, sync::Arc};

use anyhow::{bail, Result};
use axum::Router;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use sensorflow_telemetry::config;
use sensorflow_telemetry::pipeline::{self, PipelineCounters};
use sensorflow_telemetry::routes;
use sensorflow_telemetry::store::Store;

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    tracing::info!(
        "Attempting to connect to database: {}",
        config::mask_db_url(&cfg.db_url)
    );

    let store = Store::connect(&cfg)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

    let current_db = store.current_database().await?;
    if current_db != cfg.db_name {
        bail!(
            "Connected to database '{}' but DATABASE_NAME is '{}'",
            current_db,
            cfg.db_name
        );
    }
    tracing::info!("Successfully connected to database {}", current_db);

    let store = Arc::new(store);
    let counters = Arc::new(PipelineCounters::default());

    // Subscribe before the first tick so the first batch is not missed
    let listener = store.listen().await?;
    let aggregator =
        pipeline::run_change_listener(Arc::clone(&store), listener, Arc::clone(&counters));
    let generator = pipeline::run_generator_schedule(
        Arc::clone(&store),
        cfg.generate_interval,
        cfg.num_sensors as i32,
        Arc::clone(&counters),
    );

    // Build app from routes gateway (EMBP)
    let app: Router = routes::router(Arc::clone(&counters));

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.health_port));
    tracing::info!("Health endpoint listening on {}", addr);
    let tcp = tokio::net::TcpListener::bind(addr).await?;

    tokio::select! {
        _ = generator => {}
        _ = aggregator => {}
        served = axum::serve(tcp, app).into_future() => served?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested, stopping pipeline");
        }
    }

    Ok(())
}

// ---

/// Install the global `tracing` subscriber. Call once, before anything logs.
///
/// Output is compact with target, file and line. Filtering comes from
/// `RUST_LOG` when set; otherwise from `SENSORFLOW_LOG_LEVEL` (default
/// `debug`) with sqlx statement logging held at `warn`. Colour follows
/// `FORCE_COLOR` (`1|true|yes` / `0|false|no`) and falls back to TTY
/// detection.
///
/// Every generator and aggregator invocation runs in its own span, so the
/// default CLOSE span events give one timing line per invocation.
/// `SENSORFLOW_SPAN_EVENTS=full` adds ENTER/EXIT as well, `enter_exit`
/// swaps CLOSE for ENTER/EXIT.
fn init_tracing() {
    // ---
    let span_events = match env::var("SENSORFLOW_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("SENSORFLOW_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
