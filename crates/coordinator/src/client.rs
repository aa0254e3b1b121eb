//! HTTP client for the coordinator's node-facing API.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use url::Url;

use node_agent_core::{
    Ack, ClaimOutcome, Coordinator, Error, Job, NodeRegistration, RegisteredNode, Result,
    ResultSubmission,
};

use crate::transfer::{classify_status, classify_transport};

/// Header carrying the per-submission idempotency key.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Serialize)]
struct AssignRequest<'a> {
    job_id: &'a str,
    address: &'a str,
}

#[derive(Serialize)]
struct ResultRequest<'a> {
    node_id: &'a str,
    result_hash: &'a str,
    logs: &'a str,
}

/// reqwest-backed [`Coordinator`].
#[derive(Clone)]
pub struct HttpCoordinator {
    client: reqwest::Client,
    base: Url,
}

impl HttpCoordinator {
    /// Create a client for the coordinator at `base_url`.
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| Error::config(format!("Invalid coordinator URL '{}': {}", base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(Error::config(format!(
                "Coordinator URL '{}' cannot carry a path",
                base_url
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, base })
    }

    /// Build `base/seg1/seg2/...`, percent-encoding each segment.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn read_ack(context: &str, resp: reqwest::Response) -> Result<Ack> {
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| classify_transport(context, e))?;
        if !status.is_success() {
            return Err(classify_status(context, status, &text));
        }
        let body = serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text));
        Ok(Ack {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Coordinator for HttpCoordinator {
    async fn ping(&self) -> Result<()> {
        // Any HTTP response proves reachability
        self.client
            .get(self.endpoint(&["nodes"]))
            .send()
            .await
            .map_err(|e| classify_transport("Coordinator unreachable", e))?;
        Ok(())
    }

    async fn register_node(&self, registration: &NodeRegistration) -> Result<String> {
        let resp = self
            .client
            .post(self.endpoint(&["nodes", "register"]))
            .json(registration)
            .send()
            .await
            .map_err(|e| classify_transport("Node registration failed", e))?;
        let ack = Self::read_ack("Node registration failed", resp).await?;
        let node: RegisteredNode = serde_json::from_value(ack.body)?;
        tracing::info!(node_id = %node.node_id, status = %node.status, "Node registered with coordinator");
        Ok(node.node_id)
    }

    async fn assigned_jobs(&self, node_id: &str) -> Result<Vec<Job>> {
        let resp = self
            .client
            .get(self.endpoint(&["nodes", node_id, "jobs"]))
            .send()
            .await
            .map_err(|e| classify_transport("Job poll failed", e))?;
        let ack = Self::read_ack("Job poll failed", resp).await?;

        let records = match ack.body {
            serde_json::Value::Array(records) => records,
            other => {
                return Err(Error::internal(format!(
                    "Job poll returned a non-list body: {}",
                    other
                )))
            }
        };

        // One malformed record must not hide the rest of the assignment list
        let jobs = records
            .into_iter()
            .filter_map(|record| match serde_json::from_value::<Job>(record) {
                Ok(job) => Some(job),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed job record");
                    None
                }
            })
            .collect();
        Ok(jobs)
    }

    async fn assign_provider(&self, job_id: &str, provider: &str) -> Result<ClaimOutcome> {
        let resp = self
            .client
            .post(self.endpoint(&["nodes", "assign-provider"]))
            .json(&AssignRequest {
                job_id,
                address: provider,
            })
            .send()
            .await
            .map_err(|e| classify_transport("Claim failed", e))?;

        match Self::read_ack("Claim failed", resp).await {
            Ok(ack) => Ok(ClaimOutcome::Claimed(ack)),
            // 4xx: conflict, not pending, not found. The coordinator decided.
            Err(Error::Rejected { message, .. }) => Ok(ClaimOutcome::Lost { reason: message }),
            Err(e) => Err(e),
        }
    }

    async fn submit_result(&self, submission: &ResultSubmission) -> Result<Ack> {
        let resp = self
            .client
            .post(self.endpoint(&["nodes", &submission.job_id, "result"]))
            .header(IDEMPOTENCY_HEADER, submission.idempotency_key())
            .json(&ResultRequest {
                node_id: &submission.node_id,
                result_hash: submission.digest.as_str(),
                logs: &submission.logs,
            })
            .send()
            .await
            .map_err(|e| classify_transport("Result submission failed", e))?;
        Self::read_ack("Result submission failed", resp).await
    }
}
