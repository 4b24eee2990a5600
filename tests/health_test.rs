use std::sync::Arc;

use anyhow::Result;
use reqwest::Client;
use serde_json::Value;

use sensorflow_telemetry::generator::GenerationOutcome;
use sensorflow_telemetry::pipeline::PipelineCounters;
use sensorflow_telemetry::routes;

#[tokio::test]
async fn health_reports_pipeline_counters() -> Result<()> {
    // ---
    let counters = Arc::new(PipelineCounters::default());
    let app = routes::router(Arc::clone(&counters));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move { axum::serve(listener, app).await });

    let client = Client::new();
    let url = format!("http://{}/health", addr);

    let body: Value = client.get(&url).send().await?.json().await?;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["generator_runs"], 0);

    counters.record_generation(&GenerationOutcome {
        readings_written: 20,
        table_created: true,
    });
    counters.record_aggregation();

    let body: Value = client.get(&url).send().await?.json().await?;
    assert_eq!(body["generator_runs"], 1);
    assert_eq!(body["readings_written"], 20);
    assert_eq!(body["aggregations"], 1);
    assert_eq!(body["failures"], 0);

    Ok(())
}

#[tokio::test]
async fn unknown_route_is_not_found() -> Result<()> {
    // ---
    let app = routes::router(Arc::new(PipelineCounters::default()));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move { axum::serve(listener, app).await });

    let resp = Client::new()
        .get(format!("http://{}/readings", addr))
        .send()
        .await?;
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

    Ok(())
}
