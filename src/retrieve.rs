//! CLI command runners for `rtx retrieve` and `rtx health`.
//!
//! Both commands build a [`RetrievalClient`] from the loaded config, make a
//! single call, and print the result to stdout as pretty JSON. Logs go to
//! stderr via `tracing`, so stdout stays machine-readable.

use anyhow::Result;
use serde_json::{json, Value};

use crate::client::RetrievalClient;
use crate::config::Config;
use crate::models::RetrievalQuery;

/// Run one retrieval and print the documents.
///
/// `num_results` falls back to `retrieval.num_results_default`. Filter
/// values that parse as JSON (numbers, booleans, arrays) are sent typed;
/// anything else is sent as a string.
pub async fn run_retrieve(
    config: &Config,
    question: &str,
    num_results: Option<u32>,
    rerank: bool,
    filters: Vec<(String, String)>,
    correlation_id: &str,
) -> Result<()> {
    let client = RetrievalClient::builder(config.retrieval.clone()).build()?;

    let mut query = RetrievalQuery::new(question)
        .with_num_results(num_results.unwrap_or(config.retrieval.num_results_default))
        .with_rerank(rerank);
    for (key, value) in filters {
        query = query.with_filter(key, filter_value(&value));
    }

    let result = client.retrieve(&query, correlation_id).await?;

    let out = json!({
        "correlation_id": correlation_id,
        "count": result.count,
        "total": result.total,
        "processing_time_ms": result.processing_time_ms,
        "results": result.results,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

/// Probe the endpoint and print the health status.
///
/// Returns whether the endpoint is healthy so the caller can pick an exit
/// code; a failing endpoint is not an error here.
pub async fn run_health(config: &Config, correlation_id: &str) -> Result<bool> {
    let client = RetrievalClient::builder(config.retrieval.clone()).build()?;
    let status = client.health_check(correlation_id).await;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(status.is_healthy())
}

fn filter_value(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ (Value::Number(_) | Value::Bool(_) | Value::Array(_))) => v,
        _ => Value::String(raw.to_string()),
    }
}
