//! Error types for the node agent.
//!
//! Every pipeline stage returns one of these classified errors; the lifecycle
//! controller is the only place that turns a classification into a terminal
//! disposition.

use std::time::Duration;

use thiserror::Error;

use crate::types::Stage;

/// Result type alias using the agent's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the node agent.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Network Errors
    // =========================================================================
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Coordinator rejected request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    // =========================================================================
    // Input Errors
    // =========================================================================
    #[error("Invalid input: {0}")]
    PermanentInput(String),

    #[error("Reference scheme unavailable: {0}")]
    SchemeUnavailable(String),

    // =========================================================================
    // Execution Errors
    // =========================================================================
    #[error("Sandbox fault: {0}")]
    SandboxFault(String),

    #[error("Job exited with non-zero status {code}")]
    NonZeroExit { code: i64 },

    #[error("Stage '{stage}' timed out after {after:?}")]
    Timeout { stage: Stage, after: Duration },

    #[error("Shutdown requested before stage '{0}'")]
    Cancelled(Stage),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a transient network error.
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientNetwork(msg.into())
    }

    /// Create a permanent input error.
    pub fn permanent_input(msg: impl Into<String>) -> Self {
        Self::PermanentInput(msg.into())
    }

    /// Create a scheme-unavailable error.
    pub fn scheme_unavailable(msg: impl Into<String>) -> Self {
        Self::SchemeUnavailable(msg.into())
    }

    /// Create a sandbox fault.
    pub fn sandbox_fault(msg: impl Into<String>) -> Self {
        Self::SandboxFault(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether a bounded retry of the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork(_) | Self::Timeout { .. })
    }

    /// Stable classification label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TransientNetwork(_) => "transient_network",
            Self::Rejected { .. } => "rejected",
            Self::PermanentInput(_) | Self::SchemeUnavailable(_) => "permanent_input",
            Self::SandboxFault(_) => "sandbox_fault",
            Self::NonZeroExit { .. } => "non_zero_exit",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled(_) => "cancelled",
            Self::Config(_) => "config",
            Self::Serialization(_) | Self::Io(_) | Self::Internal(_) | Self::Other(_) => {
                "internal"
            }
        }
    }
}
