//! Logging, tracing and metrics setup for the node agent.

pub mod metrics;
pub mod tracing_layer;

pub use metrics::{
    record_job_outcome, record_poll, record_stage_failure, setup_metrics_recorder,
};
pub use tracing_layer::{configure_tracing, shutdown_tracing};
