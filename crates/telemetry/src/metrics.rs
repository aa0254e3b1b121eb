//! Metrics implementation using Prometheus.

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;
use node_agent_core::{Error, Result};

pub const JOBS_TOTAL: &str = "node_agent_jobs_total";
pub const STAGE_FAILURES_TOTAL: &str = "node_agent_stage_failures_total";
pub const POLLS_TOTAL: &str = "node_agent_polls_total";
pub const JOB_DURATION_SECONDS: &str = "node_agent_job_duration_seconds";

/// Install the Prometheus recorder and serve it on `listen`.
///
/// Must be called from within a Tokio runtime.
pub fn setup_metrics_recorder(listen: &str) -> Result<()> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| Error::config(format!("Invalid metrics address '{}': {}", listen, e)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| Error::config(format!("Failed to install Prometheus recorder: {}", e)))?;

    describe();
    tracing::info!(listen = %addr, "Prometheus metrics exporter listening");
    Ok(())
}

fn describe() {
    metrics::describe_counter!(JOBS_TOTAL, "Jobs that reached a terminal state, by outcome");
    metrics::describe_counter!(
        STAGE_FAILURES_TOTAL,
        "Stage failures by stage and error classification"
    );
    metrics::describe_counter!(POLLS_TOTAL, "Coordinator polls by result");
    metrics::describe_histogram!(
        JOB_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Wall-clock time from claim attempt to terminal state"
    );
}

/// Helper to track a job reaching a terminal state.
pub fn record_job_outcome(outcome: &str, elapsed: Duration) {
    metrics::counter!(JOBS_TOTAL, "outcome" => outcome.to_string()).increment(1);
    metrics::histogram!(JOB_DURATION_SECONDS, "outcome" => outcome.to_string())
        .record(elapsed.as_secs_f64());
}

/// Helper to track a classified stage failure.
pub fn record_stage_failure(stage: &str, kind: &str) {
    metrics::counter!(
        STAGE_FAILURES_TOTAL,
        "stage" => stage.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Helper to track one poll of the coordinator (`ok` or `error`).
pub fn record_poll(result: &str) {
    metrics::counter!(POLLS_TOTAL, "result" => result.to_string()).increment(1);
}
