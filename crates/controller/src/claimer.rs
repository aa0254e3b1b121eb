//! Provider claims against the coordinator.

use std::sync::Arc;

use node_agent_core::{ClaimOutcome, Coordinator, Result};

/// Registers this node's provider identity as a job's provider.
///
/// Claims are optimistic; the coordinator arbitrates races. A lost race is a
/// normal [`ClaimOutcome::Lost`], not an error.
pub struct Claimer {
    coordinator: Arc<dyn Coordinator>,
    provider: String,
}

impl Claimer {
    pub fn new(coordinator: Arc<dyn Coordinator>, provider: impl Into<String>) -> Self {
        Self {
            coordinator,
            provider: provider.into(),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub async fn claim(&self, job_id: &str) -> Result<ClaimOutcome> {
        let outcome = self
            .coordinator
            .assign_provider(job_id, &self.provider)
            .await?;
        match &outcome {
            ClaimOutcome::Claimed(_) => {
                tracing::info!(job_id = %job_id, provider = %self.provider, "Job claimed");
            }
            ClaimOutcome::Lost { reason } => {
                tracing::debug!(job_id = %job_id, reason = %reason, "Claim lost");
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use node_agent_core::mocks::MockCoordinator;
    use node_agent_core::Job;

    #[tokio::test]
    async fn test_second_provider_loses() {
        let coordinator = Arc::new(MockCoordinator::with_jobs(vec![Job::new(
            "j1",
            "http://x/data.bin",
            "img:v1",
        )]));
        let a = Claimer::new(coordinator.clone(), "0xA");
        let b = Claimer::new(coordinator.clone(), "0xB");

        assert!(a.claim("j1").await.unwrap().is_claimed());
        assert!(!b.claim("j1").await.unwrap().is_claimed());
        assert_eq!(coordinator.provider_of("j1").as_deref(), Some("0xA"));
    }

    #[tokio::test]
    async fn test_transport_failure_is_an_error() {
        let coordinator = Arc::new(MockCoordinator::with_jobs(vec![Job::new("j1", "d", "i")]));
        coordinator.fail_claims(1);
        let claimer = Claimer::new(coordinator, "0xA");

        let err = claimer.claim("j1").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
