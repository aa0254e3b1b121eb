//! Result delivery with bounded exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use node_agent_core::config::ReportConfig;
use node_agent_core::{Ack, Coordinator, Result, ResultSubmission};

/// Bounded exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): doubles, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}

impl From<&ReportConfig> for RetryPolicy {
    fn from(config: &ReportConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

/// Delivers results to the coordinator.
///
/// Every attempt sends the same [`ResultSubmission`], so the body and
/// idempotency key are identical across retries.
pub struct Reporter {
    coordinator: Arc<dyn Coordinator>,
    policy: RetryPolicy,
}

impl Reporter {
    pub fn new(coordinator: Arc<dyn Coordinator>, policy: RetryPolicy) -> Self {
        Self {
            coordinator,
            policy,
        }
    }

    pub async fn report(&self, submission: &ResultSubmission) -> Result<Ack> {
        let mut attempt = 1;
        loop {
            match self.coordinator.submit_result(submission).await {
                Ok(ack) => {
                    tracing::info!(
                        job_id = %submission.job_id,
                        digest = %submission.digest,
                        attempt,
                        "Result accepted by coordinator"
                    );
                    return Ok(ack);
                }
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    tracing::warn!(
                        job_id = %submission.job_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Result submission failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        job_id = %submission.job_id,
                        attempt,
                        kind = e.kind(),
                        error = %e,
                        "Result submission abandoned"
                    );
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use node_agent_core::mocks::MockCoordinator;
    use node_agent_core::{Digest, Error, Job};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    fn submission() -> ResultSubmission {
        ResultSubmission::new("j1", "node-1", Digest::from_bytes(&[9; 32]), "done")
    }

    fn coordinator() -> Arc<MockCoordinator> {
        Arc::new(MockCoordinator::with_jobs(vec![Job::new("j1", "d", "i")]))
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_millis(8_000),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(4), Duration::from_millis(4_000));
        assert_eq!(policy.backoff(6), Duration::from_millis(8_000));
        assert_eq!(policy.backoff(64), Duration::from_millis(8_000));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let coordinator = coordinator();
        coordinator.fail_submissions(vec![
            Error::transient("connection reset"),
            Error::transient("HTTP 503"),
        ]);
        let reporter = Reporter::new(coordinator.clone(), policy(5));

        reporter.report(&submission()).await.unwrap();
        assert_eq!(coordinator.submit_attempts(), 3);
        assert_eq!(coordinator.results().len(), 1);
    }

    #[tokio::test]
    async fn test_permanent_rejection_is_not_retried() {
        let coordinator = coordinator();
        coordinator.fail_submissions(vec![Error::Rejected {
            status: 404,
            message: "Job not found".into(),
        }]);
        let reporter = Reporter::new(coordinator.clone(), policy(5));

        let err = reporter.report(&submission()).await.unwrap_err();
        assert!(matches!(err, Error::Rejected { status: 404, .. }));
        assert_eq!(coordinator.submit_attempts(), 1);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let coordinator = coordinator();
        coordinator.fail_submissions((0..10).map(|_| Error::transient("down")).collect());
        let reporter = Reporter::new(coordinator.clone(), policy(3));

        assert!(reporter.report(&submission()).await.is_err());
        assert_eq!(coordinator.submit_attempts(), 3);
        assert!(coordinator.results().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_delivery_has_single_effect() {
        let coordinator = coordinator();
        let reporter = Reporter::new(coordinator.clone(), policy(1));

        reporter.report(&submission()).await.unwrap();
        reporter.report(&submission()).await.unwrap();
        assert_eq!(coordinator.submit_attempts(), 2);
        assert_eq!(coordinator.results().len(), 1);
    }
}
