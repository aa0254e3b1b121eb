//! Job lifecycle state machine.
//!
//! ```text
//! Pending → Claiming → Fetching → Executing → Hashing → Reporting → Completed
//!    │          │          │           │          │           │
//!    └──────────┴→ Skipped └───────────┴──────────┴───────────┴→ Failed
//! ```
//!
//! The pipeline owns the job's workspace from entering `Fetching` until it
//! leaves `Hashing` or fails; the [`Workspace`] drop guard covers panics and
//! dropped futures.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use node_agent_core::config::NonZeroExitPolicy;
use node_agent_core::{ClaimOutcome, Digest, Error, Job, Result, ResultSubmission, Stage};
use node_agent_sandbox::SandboxLimits;
use node_agent_telemetry::{record_job_outcome, record_stage_failure};

use crate::claimer::Claimer;
use crate::context::AgentContext;
use crate::digest::digest_output;
use crate::reporter::{Reporter, RetryPolicy};
use crate::workspace::Workspace;

/// Extra time granted beyond the sandbox's own timeout before the pipeline
/// gives up on the backend.
const EXECUTE_GRACE: Duration = Duration::from_secs(30);

// =============================================================================
// States
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Pending,
    Claiming,
    Fetching,
    Executing,
    Hashing,
    Reporting,
    Completed,
    Failed,
    Skipped,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Claiming => "claiming",
            JobState::Fetching => "fetching",
            JobState::Executing => "executing",
            JobState::Hashing => "hashing",
            JobState::Reporting => "reporting",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Skipped
        )
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Claiming)
                | (Pending, Skipped)
                | (Claiming, Fetching)
                | (Claiming, Skipped)
                | (Claiming, Failed)
                | (Fetching, Executing)
                | (Fetching, Failed)
                | (Executing, Hashing)
                | (Executing, Failed)
                | (Hashing, Reporting)
                | (Hashing, Failed)
                | (Reporting, Completed)
                | (Reporting, Failed)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Stage> for JobState {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Claiming => JobState::Claiming,
            Stage::Fetching => JobState::Fetching,
            Stage::Executing => JobState::Executing,
            Stage::Hashing => JobState::Hashing,
            Stage::Reporting => JobState::Reporting,
        }
    }
}

/// Terminal record of one pipeline run.
#[derive(Debug)]
pub struct JobOutcome {
    pub job_id: String,
    pub state: JobState,
    /// Every state visited, starting with `Pending`.
    pub history: Vec<JobState>,
    pub digest: Option<Digest>,
    /// Logs attached to the result, or a description of the failure.
    pub logs: String,
    pub error: Option<Error>,
    pub elapsed: Duration,
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        self.state == JobState::Completed
    }

    pub fn visited(&self, state: JobState) -> bool {
        self.history.contains(&state)
    }
}

/// Validated, logged state transitions for one job.
struct Tracker {
    job_id: String,
    state: JobState,
    history: Vec<JobState>,
}

impl Tracker {
    fn new(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            state: JobState::Pending,
            history: vec![JobState::Pending],
        }
    }

    fn advance(&mut self, next: JobState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::internal(format!(
                "Illegal job transition {} -> {}",
                self.state, next
            )));
        }
        tracing::info!(job_id = %self.job_id, from = %self.state, to = %next, "Job state transition");
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Enter a stage, mapping an illegal transition onto a stage failure.
    fn enter(&mut self, stage: Stage) -> std::result::Result<(), Failure> {
        self.advance(stage.into()).map_err(Failure::at(stage))
    }

    /// Enter a terminal state. An illegal terminal transition is a bug; it is
    /// logged and the state is forced so the outcome stays terminal.
    fn finish(&mut self, terminal: JobState) {
        if let Err(e) = self.advance(terminal) {
            tracing::error!(job_id = %self.job_id, error = %e, "Forcing terminal state");
            self.state = terminal;
            self.history.push(terminal);
        }
    }
}

// =============================================================================
// Pipeline
// =============================================================================

enum End {
    Completed { digest: Digest, logs: String },
    Skipped(String),
}

struct Failure {
    stage: Stage,
    error: Error,
    logs: String,
}

impl Failure {
    fn at(stage: Stage) -> impl FnOnce(Error) -> Failure {
        move |error| Failure {
            stage,
            logs: format!("[node-agent] {} failed: {}", stage, error),
            error,
        }
    }
}

/// Runs one job from claim to report.
pub struct JobPipeline {
    ctx: Arc<AgentContext>,
    claimer: Claimer,
    reporter: Reporter,
}

impl JobPipeline {
    pub fn new(ctx: Arc<AgentContext>) -> Self {
        let claimer = Claimer::new(ctx.coordinator.clone(), ctx.provider_address());
        let reporter = Reporter::new(
            ctx.coordinator.clone(),
            RetryPolicy::from(&ctx.config.report),
        );
        Self {
            ctx,
            claimer,
            reporter,
        }
    }

    /// Drive `job` to a terminal state. Never fails; the outcome carries the
    /// classification of whatever went wrong.
    pub async fn run(&self, job: Job, cancel: &CancellationToken) -> JobOutcome {
        let started = Instant::now();
        let mut tracker = Tracker::new(&job.job_id);

        let (state, digest, logs, error) = match self.drive(&job, &mut tracker, cancel).await {
            Ok(End::Completed { digest, logs }) => {
                (JobState::Completed, Some(digest), logs, None)
            }
            Ok(End::Skipped(reason)) => {
                tracing::info!(job_id = %job.job_id, reason = %reason, "Job skipped");
                (JobState::Skipped, None, String::new(), None)
            }
            Err(Failure { stage, error, logs }) => {
                match &error {
                    Error::Io(_) | Error::Internal(_) | Error::Other(_) => {
                        tracing::error!(job_id = %job.job_id, stage = %stage, kind = error.kind(), error = %error, "Job failed");
                    }
                    _ => {
                        tracing::warn!(job_id = %job.job_id, stage = %stage, kind = error.kind(), error = %error, "Job failed");
                    }
                }
                record_stage_failure(stage.as_str(), error.kind());
                (JobState::Failed, None, logs, Some(error))
            }
        };
        tracker.finish(state);

        let elapsed = started.elapsed();
        record_job_outcome(state.as_str(), elapsed);
        JobOutcome {
            job_id: job.job_id,
            state,
            history: tracker.history,
            digest,
            logs,
            error,
            elapsed,
        }
    }

    async fn drive(
        &self,
        job: &Job,
        tracker: &mut Tracker,
        cancel: &CancellationToken,
    ) -> std::result::Result<End, Failure> {
        if !job.status.is_actionable() {
            return Ok(End::Skipped(format!("status '{}' is not actionable", job.status)));
        }
        if cancel.is_cancelled() {
            return Ok(End::Skipped("shutdown requested before claim".into()));
        }

        // Claiming
        tracker.enter(Stage::Claiming)?;
        let claim = within(
            self.ctx.stage_timeout(Stage::Claiming),
            Stage::Claiming,
            self.claimer.claim(&job.job_id),
        )
        .await;
        match claim {
            Ok(ClaimOutcome::Claimed(_)) => {}
            Ok(ClaimOutcome::Lost { reason }) => {
                return Ok(End::Skipped(format!("claim lost: {}", reason)));
            }
            Err(e) => {
                tracing::warn!(job_id = %job.job_id, kind = e.kind(), error = %e, "Claim failed; retrying on a later poll");
                record_stage_failure(Stage::Claiming.as_str(), e.kind());
                return Ok(End::Skipped(format!("claim failed: {}", e)));
            }
        }

        // Fetching, Executing, Hashing
        checkpoint(cancel, Stage::Fetching)?;
        tracker.enter(Stage::Fetching)?;
        let workspace = Workspace::create(&self.ctx.config.workspace.root, &job.job_id)
            .await
            .map_err(Failure::at(Stage::Fetching))?;
        let produced = self.in_workspace(job, tracker, cancel, &workspace).await;
        if let Err(e) = workspace.cleanup().await {
            tracing::warn!(job_id = %job.job_id, error = %e, "Failed to remove workspace");
        }
        let (digest, logs) = produced?;

        // Reporting: a computed result is always delivered, even during shutdown
        tracker.enter(Stage::Reporting)?;
        let submission = ResultSubmission::new(
            job.job_id.clone(),
            self.ctx.node_id.clone(),
            digest.clone(),
            logs.clone(),
        );
        within(
            self.ctx.stage_timeout(Stage::Reporting),
            Stage::Reporting,
            self.reporter.report(&submission),
        )
        .await
        .map_err(Failure::at(Stage::Reporting))?;

        Ok(End::Completed { digest, logs })
    }

    /// Stages that need the workspace. Returns the digest and bounded logs.
    async fn in_workspace(
        &self,
        job: &Job,
        tracker: &mut Tracker,
        cancel: &CancellationToken,
        workspace: &Workspace,
    ) -> std::result::Result<(Digest, String), Failure> {
        let config = &self.ctx.config;

        let bytes = within(
            self.ctx.stage_timeout(Stage::Fetching),
            Stage::Fetching,
            self.ctx.fetcher.fetch(&job.dataset, workspace.paths()),
        )
        .await
        .map_err(Failure::at(Stage::Fetching))?;
        tracing::debug!(job_id = %job.job_id, bytes, "Dataset staged");

        checkpoint(cancel, Stage::Executing)?;
        tracker.enter(Stage::Executing)?;
        let execute_timeout = self.ctx.stage_timeout(Stage::Executing);
        let limits = SandboxLimits::from_settings(&config.sandbox, execute_timeout);
        let record = within(
            execute_timeout + EXECUTE_GRACE,
            Stage::Executing,
            self.ctx
                .sandbox
                .run(&job.container_image, workspace.paths(), &limits),
        )
        .await
        .map_err(Failure::at(Stage::Executing))?;

        let logs = bounded_tail(&record.logs(), config.sandbox.max_log_bytes);
        if !record.success() {
            match config.sandbox.non_zero_exit {
                NonZeroExitPolicy::Report => {
                    tracing::warn!(job_id = %job.job_id, exit_code = record.exit_code, "Job exited non-zero; reporting its output");
                }
                NonZeroExitPolicy::Fail => {
                    let error = Error::NonZeroExit {
                        code: record.exit_code,
                    };
                    let logs = bounded_tail(
                        &format!("{}\n[node-agent] {}", logs, error),
                        config.sandbox.max_log_bytes,
                    );
                    return Err(Failure {
                        stage: Stage::Executing,
                        error,
                        logs,
                    });
                }
            }
        }

        checkpoint(cancel, Stage::Hashing)?;
        tracker.enter(Stage::Hashing)?;
        let digest = within(
            self.ctx.stage_timeout(Stage::Hashing),
            Stage::Hashing,
            digest_output(workspace.paths()),
        )
        .await
        .map_err(Failure::at(Stage::Hashing))?;

        Ok((digest, logs))
    }
}

/// Fail with [`Error::Cancelled`] if shutdown was requested before `next`.
fn checkpoint(cancel: &CancellationToken, next: Stage) -> std::result::Result<(), Failure> {
    if cancel.is_cancelled() {
        Err(Failure::at(next)(Error::Cancelled(next)))
    } else {
        Ok(())
    }
}

/// Bound a stage by its timeout.
async fn within<T, F>(limit: Duration, stage: Stage, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            stage,
            after: limit,
        }),
    }
}

/// The last `max` bytes of `logs`, cut on a character boundary.
pub fn bounded_tail(logs: &str, max: usize) -> String {
    if logs.len() <= max {
        return logs.to_string();
    }
    let mut start = logs.len() - max;
    while !logs.is_char_boundary(start) {
        start += 1;
    }
    logs[start..].to_string()
}
