//! Coordinator contract.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Ack, ClaimOutcome, Job, NodeRegistration, ResultSubmission};

/// The coordinating scheduler, the single source of truth for job status
/// and provider arbitration.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Check that the coordinator is reachable.
    async fn ping(&self) -> Result<()>;

    /// Register this node and return the coordinator-assigned node id.
    async fn register_node(&self, registration: &NodeRegistration) -> Result<String>;

    /// List jobs currently assigned to `node_id`.
    async fn assigned_jobs(&self, node_id: &str) -> Result<Vec<Job>>;

    /// Attempt to become the provider of `job_id`.
    ///
    /// Losing the race is a successful call returning [`ClaimOutcome::Lost`];
    /// only transport-level failures are errors.
    async fn assign_provider(&self, job_id: &str, provider: &str) -> Result<ClaimOutcome>;

    /// Deliver a job result. Safe to call repeatedly with the same submission.
    async fn submit_result(&self, submission: &ResultSubmission) -> Result<Ack>;
}
