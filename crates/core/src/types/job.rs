//! Job records as advertised by the coordinator.

use serde::{Deserialize, Serialize};

/// Opaque, globally unique job identifier.
pub type JobId = String;

/// Coordinator-side status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
    /// Any status this agent does not understand. Never actionable.
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    /// Whether a job in this status should enter the pipeline.
    ///
    /// `failed` is actionable because the coordinator re-surfaces jobs after a
    /// previous provider failed them.
    pub fn is_actionable(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Assigned => "assigned",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A unit of work assigned by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(rename = "jobId")]
    pub job_id: JobId,
    /// Dataset reference: an HTTP(S) URL or a content-addressed identifier.
    pub dataset: String,
    /// Execution image reference resolvable by the sandbox runtime.
    #[serde(rename = "containerImage", alias = "containerCID")]
    pub container_image: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_hash: Option<String>,
}

impl Job {
    /// Create a pending job with no provider assigned.
    pub fn new(
        job_id: impl Into<String>,
        dataset: impl Into<String>,
        container_image: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            dataset: dataset.into(),
            container_image: container_image.into(),
            status: JobStatus::Pending,
            provider_address: None,
            assigned_node: None,
            result_hash: None,
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }
}
