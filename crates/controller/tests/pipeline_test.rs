//! End-to-end pipeline tests against in-memory collaborators.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest as _, Sha256};
use tokio_util::sync::CancellationToken;

use node_agent_controller::{Agent, AgentContext, JobPipeline, JobState};
use node_agent_core::config::NonZeroExitPolicy;
use node_agent_core::mocks::{MockContentStore, MockCoordinator};
use async_trait::async_trait;
use node_agent_core::{
    Ack, AgentConfig, ClaimOutcome, Coordinator, Digest, Error, Job, JobStatus, NodeRegistration,
    Result, ResultSubmission, Stage, WorkspacePaths,
};
use node_agent_sandbox::{ExecutionRecord, MockRun, MockSandbox, SandboxEngine, SandboxLimits};

const DATASET_URL: &str = "http://x/data.bin";
const DATASET: &[u8] = b"0,1,2,3,5,8,13";
const CID: &str = "QmWATWQ7fVPP2EFGu71UkfnqhYXDYH566qy47CnJDgvs8u";

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    root: tempfile::TempDir,
    coordinator: Arc<MockCoordinator>,
    sandbox: Arc<MockSandbox>,
    http: Arc<MockContentStore>,
    config: AgentConfig,
}

impl Harness {
    fn new(jobs: Vec<Job>, runs: Vec<MockRun>) -> Self {
        let root = tempfile::tempdir().unwrap();
        let http = Arc::new(MockContentStore::new(true));
        http.insert(DATASET_URL, DATASET);

        let mut config = AgentConfig::default();
        config.node.provider_address = "0xA".into();
        config.workspace.root = root.path().join("jobs");
        config.coordinator.poll_interval_ms = 20;
        config.fetch.retry_delay_ms = 1;
        config.report.initial_backoff_ms = 1;
        config.report.max_backoff_ms = 4;

        Self {
            root,
            coordinator: Arc::new(MockCoordinator::with_jobs(jobs)),
            sandbox: Arc::new(MockSandbox::new(runs)),
            http,
            config,
        }
    }

    async fn context_for(&self, provider: &str) -> Arc<AgentContext> {
        let mut config = self.config.clone();
        config.node.provider_address = provider.into();
        AgentContext::builder(config)
            .with_node_id(format!("node-{}", provider))
            .with_coordinator(self.coordinator.clone())
            .with_sandbox(self.sandbox.clone())
            .with_http_source(self.http.clone())
            .build()
            .await
            .unwrap()
    }

    async fn pipeline(&self) -> JobPipeline {
        JobPipeline::new(self.context_for("0xA").await)
    }

    fn workspace_root(&self) -> &Path {
        &self.config.workspace.root
    }

    fn leftover_workspaces(&self) -> usize {
        match std::fs::read_dir(self.workspace_root()) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

fn job_j1() -> Job {
    Job::new("j1", DATASET_URL, "img:v1")
}

fn sha256_digest(bytes: &[u8]) -> Digest {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(bytes));
    Digest::from_bytes(&out)
}

// =============================================================================
// 1. Happy path
// =============================================================================

#[tokio::test]
async fn test_happy_path_completes_and_reports() {
    let h = Harness::new(vec![job_j1()], vec![]);
    let outcome = h.pipeline().await.run(job_j1(), &CancellationToken::new()).await;

    assert_eq!(outcome.state, JobState::Completed, "{:?}", outcome.error);
    assert_eq!(
        outcome.history,
        vec![
            JobState::Pending,
            JobState::Claiming,
            JobState::Fetching,
            JobState::Executing,
            JobState::Hashing,
            JobState::Reporting,
            JobState::Completed,
        ]
    );

    // The mock copies the dataset to output/result.bin
    let digest = outcome.digest.unwrap();
    assert!(Digest::is_well_formed(digest.as_str()));
    assert_eq!(digest, sha256_digest(DATASET));

    let results = h.coordinator.results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].job_id, "j1");
    assert_eq!(results[0].node_id, "node-0xA");
    assert_eq!(results[0].result_hash, digest.as_str());
    assert!(results[0].logs.contains("processed 14 bytes"));

    assert_eq!(h.coordinator.provider_of("j1").as_deref(), Some("0xA"));
    assert_eq!(h.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_content_addressed_dataset_via_store() {
    let h = Harness::new(vec![Job::new("j2", format!("ipfs://{}", CID), "img:v1")], vec![]);
    let store = Arc::new(MockContentStore::new(true));
    store.insert(CID, b"from the content store");
    let ctx = AgentContext::builder(h.config.clone())
        .with_node_id("node-1")
        .with_coordinator(h.coordinator.clone())
        .with_sandbox(h.sandbox.clone())
        .with_http_source(h.http.clone())
        .with_content_store(store)
        .build()
        .await
        .unwrap();

    let job = Job::new("j2", format!("ipfs://{}", CID), "img:v1");
    let outcome = JobPipeline::new(ctx).run(job, &CancellationToken::new()).await;

    assert!(outcome.is_completed());
    assert_eq!(outcome.digest.unwrap(), sha256_digest(b"from the content store"));
}

// =============================================================================
// 2. Claim race
// =============================================================================

#[tokio::test]
async fn test_claim_race_exactly_one_winner() {
    let h = Harness::new(vec![job_j1()], vec![]);
    let node_a = JobPipeline::new(h.context_for("0xA").await);
    let node_b = JobPipeline::new(h.context_for("0xB").await);
    let cancel = CancellationToken::new();

    let (a, b) = tokio::join!(node_a.run(job_j1(), &cancel), node_b.run(job_j1(), &cancel));

    let (winner, loser) = if a.is_completed() { (a, b) } else { (b, a) };
    assert_eq!(winner.state, JobState::Completed);
    assert_eq!(loser.state, JobState::Skipped);
    assert!(!loser.visited(JobState::Fetching));
    assert!(loser.error.is_none());

    assert_eq!(h.sandbox.invocations(), 1);
    assert_eq!(h.http.fetch_attempts(), 1);
    assert_eq!(h.coordinator.results().len(), 1);
    assert_eq!(h.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_transient_claim_failure_is_skipped_then_retried() {
    let h = Harness::new(vec![job_j1()], vec![]);
    h.coordinator.fail_claims(1);
    let pipeline = h.pipeline().await;
    let cancel = CancellationToken::new();

    let first = pipeline.run(job_j1(), &cancel).await;
    assert_eq!(first.state, JobState::Skipped);
    assert!(!first.visited(JobState::Fetching));

    let second = pipeline.run(job_j1(), &cancel).await;
    assert_eq!(second.state, JobState::Completed);
    assert_eq!(h.coordinator.claim_attempts(), 2);
}

// =============================================================================
// 3. Fetch failures
// =============================================================================

#[tokio::test]
async fn test_fetch_retry_bound_fails_job() {
    let mut h = Harness::new(vec![job_j1()], vec![]);
    h.config.fetch.retries = 2;
    h.http.fail_fetches(10);

    let outcome = h.pipeline().await.run(job_j1(), &CancellationToken::new()).await;

    assert_eq!(outcome.state, JobState::Failed);
    assert!(outcome.error.as_ref().unwrap().is_retryable());
    assert_eq!(h.http.fetch_attempts(), 3);
    assert!(!outcome.visited(JobState::Executing));
    assert_eq!(h.sandbox.invocations(), 0);
    assert!(h.coordinator.results().is_empty());
    assert_eq!(h.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_content_addressed_without_store_fails_fast() {
    let job = Job::new("j3", CID, "img:v1");
    let h = Harness::new(vec![job.clone()], vec![]);

    let outcome = h.pipeline().await.run(job, &CancellationToken::new()).await;

    assert_eq!(outcome.state, JobState::Failed);
    assert!(matches!(outcome.error, Some(Error::SchemeUnavailable(_))));
    assert!(outcome.logs.contains("fetching failed"));
    assert!(outcome.logs.contains(CID));
    assert_eq!(h.sandbox.invocations(), 0);
    assert_eq!(h.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_unsupported_scheme_is_permanent() {
    let job = Job::new("j4", "ftp://x/data.bin", "img:v1");
    let h = Harness::new(vec![job.clone()], vec![]);

    let outcome = h.pipeline().await.run(job, &CancellationToken::new()).await;

    assert!(matches!(outcome.error, Some(Error::PermanentInput(_))));
    assert_eq!(h.http.fetch_attempts(), 0);
    assert_eq!(h.sandbox.invocations(), 0);
}

// =============================================================================
// 4. Execution failures and cleanup
// =============================================================================

#[tokio::test]
async fn test_sandbox_fault_fails_and_cleans_up() {
    let h = Harness::new(vec![job_j1()], vec![MockRun::Fault("image not found".into())]);

    let outcome = h.pipeline().await.run(job_j1(), &CancellationToken::new()).await;

    assert_eq!(outcome.state, JobState::Failed);
    assert!(matches!(outcome.error, Some(Error::SandboxFault(_))));
    assert!(!outcome.visited(JobState::Hashing));
    assert!(h.coordinator.results().is_empty());
    assert_eq!(h.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_panic_mid_stage_still_removes_workspace() {
    let h = Harness::new(vec![job_j1()], vec![MockRun::Panic]);
    let pipeline = Arc::new(h.pipeline().await);

    let task = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.run(job_j1(), &CancellationToken::new()).await })
    };
    let err = task.await.unwrap_err();

    assert!(err.is_panic());
    assert_eq!(h.sandbox.invocations(), 1);
    assert_eq!(h.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_execution_timeout_fails_job() {
    let mut h = Harness::new(vec![job_j1()], vec![MockRun::Hang]);
    h.config.timeouts.execute_ms = 50;

    let outcome = h.pipeline().await.run(job_j1(), &CancellationToken::new()).await;

    assert_eq!(outcome.state, JobState::Failed);
    assert!(matches!(
        outcome.error,
        Some(Error::Timeout {
            stage: Stage::Executing,
            ..
        })
    ));
    assert_eq!(h.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_non_zero_exit_is_reported_by_default() {
    let run = MockRun::Exit {
        code: 2,
        stdout: "partial results".into(),
        outputs: vec![("out.csv".into(), b"a,b".to_vec())],
    };
    let h = Harness::new(vec![job_j1()], vec![run]);

    let outcome = h.pipeline().await.run(job_j1(), &CancellationToken::new()).await;

    assert!(outcome.is_completed());
    assert_eq!(outcome.digest.unwrap(), sha256_digest(b"a,b"));
    assert_eq!(h.coordinator.results().len(), 1);
}

#[tokio::test]
async fn test_non_zero_exit_fails_under_fail_policy() {
    let run = MockRun::Exit {
        code: 2,
        stdout: "partial results".into(),
        outputs: vec![],
    };
    let mut h = Harness::new(vec![job_j1()], vec![run]);
    h.config.sandbox.non_zero_exit = NonZeroExitPolicy::Fail;

    let outcome = h.pipeline().await.run(job_j1(), &CancellationToken::new()).await;

    assert_eq!(outcome.state, JobState::Failed);
    assert!(matches!(outcome.error, Some(Error::NonZeroExit { code: 2 })));
    assert!(outcome.logs.starts_with("partial results"));
    assert!(h.coordinator.results().is_empty());
    assert_eq!(h.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_reported_logs_are_bounded_to_tail() {
    let mut stdout = "x".repeat(500);
    stdout.push_str("FINAL LINE");
    let run = MockRun::Exit {
        code: 0,
        stdout,
        outputs: vec![],
    };
    let mut h = Harness::new(vec![job_j1()], vec![run]);
    h.config.sandbox.max_log_bytes = 64;

    h.pipeline().await.run(job_j1(), &CancellationToken::new()).await;

    let logs = &h.coordinator.results()[0].logs;
    assert_eq!(logs.len(), 64);
    assert!(logs.ends_with("FINAL LINE"));
}

// =============================================================================
// 5. Reporting
// =============================================================================

#[tokio::test]
async fn test_permanent_report_rejection_fails_without_retry() {
    let h = Harness::new(vec![job_j1()], vec![]);
    h.coordinator.fail_submissions(vec![Error::Rejected {
        status: 400,
        message: "Job not assigned to this node".into(),
    }]);

    let outcome = h.pipeline().await.run(job_j1(), &CancellationToken::new()).await;

    assert_eq!(outcome.state, JobState::Failed);
    assert!(outcome.visited(JobState::Reporting));
    assert_eq!(h.coordinator.submit_attempts(), 1);
    assert_eq!(h.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_transient_report_failures_are_retried() {
    let h = Harness::new(vec![job_j1()], vec![]);
    h.coordinator
        .fail_submissions(vec![Error::transient("503"), Error::transient("reset")]);

    let outcome = h.pipeline().await.run(job_j1(), &CancellationToken::new()).await;

    assert!(outcome.is_completed());
    assert_eq!(h.coordinator.submit_attempts(), 3);
    assert_eq!(h.coordinator.results().len(), 1);
}

// =============================================================================
// 6. Cancellation
// =============================================================================

#[tokio::test]
async fn test_cancelled_before_claim_is_skipped() {
    let h = Harness::new(vec![job_j1()], vec![]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = h.pipeline().await.run(job_j1(), &cancel).await;

    assert_eq!(outcome.state, JobState::Skipped);
    assert_eq!(outcome.history, vec![JobState::Pending, JobState::Skipped]);
    assert_eq!(h.coordinator.claim_attempts(), 0);
}

/// Sandbox that requests shutdown while the job is executing.
struct ShutdownDuringRun {
    inner: MockSandbox,
    cancel: CancellationToken,
}

#[async_trait]
impl SandboxEngine for ShutdownDuringRun {
    fn name(&self) -> &str {
        "shutdown-during-run"
    }

    async fn run(
        &self,
        image: &str,
        workspace: &WorkspacePaths,
        limits: &SandboxLimits,
    ) -> Result<ExecutionRecord> {
        self.cancel.cancel();
        self.inner.run(image, workspace, limits).await
    }

    async fn is_available(&self) -> bool {
        true
    }
}

/// Coordinator that requests shutdown when a result arrives.
struct ShutdownDuringReport {
    inner: Arc<MockCoordinator>,
    cancel: CancellationToken,
}

#[async_trait]
impl Coordinator for ShutdownDuringReport {
    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }

    async fn register_node(&self, registration: &NodeRegistration) -> Result<String> {
        self.inner.register_node(registration).await
    }

    async fn assigned_jobs(&self, node_id: &str) -> Result<Vec<Job>> {
        self.inner.assigned_jobs(node_id).await
    }

    async fn assign_provider(&self, job_id: &str, provider: &str) -> Result<ClaimOutcome> {
        self.inner.assign_provider(job_id, provider).await
    }

    async fn submit_result(&self, submission: &ResultSubmission) -> Result<Ack> {
        self.cancel.cancel();
        self.inner.submit_result(submission).await
    }
}

#[tokio::test]
async fn test_shutdown_mid_execution_finishes_stage_then_cleans_up() {
    let h = Harness::new(vec![job_j1()], vec![]);
    let cancel = CancellationToken::new();
    let sandbox = Arc::new(ShutdownDuringRun {
        inner: MockSandbox::default(),
        cancel: cancel.clone(),
    });
    let ctx = AgentContext::builder(h.config.clone())
        .with_node_id("node-0xA")
        .with_coordinator(h.coordinator.clone())
        .with_sandbox(sandbox.clone())
        .with_http_source(h.http.clone())
        .build()
        .await
        .unwrap();

    let outcome = JobPipeline::new(ctx).run(job_j1(), &cancel).await;

    assert_eq!(outcome.state, JobState::Failed);
    assert_eq!(
        outcome.history,
        vec![
            JobState::Pending,
            JobState::Claiming,
            JobState::Fetching,
            JobState::Executing,
            JobState::Failed,
        ]
    );
    assert!(
        matches!(outcome.error, Some(Error::Cancelled(Stage::Hashing))),
        "{:?}",
        outcome.error
    );
    // The stage in progress ran to completion
    assert_eq!(sandbox.inner.invocations(), 1);
    assert!(h.coordinator.results().is_empty());
    assert_eq!(h.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_computed_result_is_reported_during_shutdown() {
    let h = Harness::new(vec![job_j1()], vec![]);
    h.coordinator.fail_submissions(vec![Error::transient("503")]);
    let cancel = CancellationToken::new();
    let coordinator = Arc::new(ShutdownDuringReport {
        inner: h.coordinator.clone(),
        cancel: cancel.clone(),
    });
    let ctx = AgentContext::builder(h.config.clone())
        .with_node_id("node-0xA")
        .with_coordinator(coordinator)
        .with_sandbox(h.sandbox.clone())
        .with_http_source(h.http.clone())
        .build()
        .await
        .unwrap();

    let outcome = JobPipeline::new(ctx).run(job_j1(), &cancel).await;

    assert!(cancel.is_cancelled());
    assert_eq!(outcome.state, JobState::Completed, "{:?}", outcome.error);
    // The retry after the 503 still went out
    assert_eq!(h.coordinator.submit_attempts(), 2);
    let results = h.coordinator.results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].result_hash, sha256_digest(DATASET).as_str());
    assert_eq!(h.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_non_actionable_status_is_skipped() {
    let job = job_j1().with_status(JobStatus::Completed);
    let h = Harness::new(vec![job.clone()], vec![]);

    let outcome = h.pipeline().await.run(job, &CancellationToken::new()).await;

    assert_eq!(outcome.state, JobState::Skipped);
    assert_eq!(h.coordinator.claim_attempts(), 0);
}

// =============================================================================
// 7. Agent loop
// =============================================================================

#[tokio::test]
async fn test_poll_filters_and_deduplicates() {
    let h = Harness::new(
        vec![
            job_j1(),
            Job::new("j2", DATASET_URL, "img:v1").with_status(JobStatus::Assigned),
            Job::new("j3", DATASET_URL, "img:v1").with_status(JobStatus::Failed),
            job_j1(),
            Job::new("j5", DATASET_URL, "img:v1").with_status(JobStatus::Unknown),
        ],
        vec![],
    );
    let agent = Agent::new(h.context_for("0xA").await);

    let ids: Vec<_> = agent.poll().await.into_iter().map(|j| j.job_id).collect();
    assert_eq!(ids, vec!["j1".to_string(), "j3".to_string()]);
}

#[tokio::test]
async fn test_poll_failure_yields_nothing() {
    let h = Harness::new(vec![job_j1()], vec![]);
    h.coordinator.fail_polls(1);
    let agent = Agent::new(h.context_for("0xA").await);

    assert!(agent.poll().await.is_empty());
    assert_eq!(agent.poll().await.len(), 1);
}

#[tokio::test]
async fn test_run_once_processes_batch() {
    let h = Harness::new(
        vec![job_j1(), Job::new("j2", DATASET_URL, "img:v2")],
        vec![],
    );
    let agent = Agent::new(h.context_for("0xA").await);

    let outcomes = agent.run_once(&CancellationToken::new()).await;

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.is_completed()));
    assert_eq!(h.coordinator.results().len(), 2);
    assert_eq!(h.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_run_loop_stops_on_cancel() {
    let h = Harness::new(vec![job_j1()], vec![]);
    let agent = Arc::new(Agent::new(h.context_for("0xA").await));
    let cancel = CancellationToken::new();

    let handle = {
        let agent = agent.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { agent.run(cancel).await })
    };

    for _ in 0..200 {
        if !h.coordinator.results().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(h.coordinator.results().len(), 1);
    assert_eq!(h.leftover_workspaces(), 0);
    drop(h.root);
}
