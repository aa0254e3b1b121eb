//! Poll loop feeding assigned jobs to the pipeline.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use node_agent_core::{Job, Result};
use node_agent_telemetry::record_poll;

use crate::context::AgentContext;
use crate::lifecycle::{JobOutcome, JobPipeline};
use crate::scheduler::JobScheduler;

/// The node agent: polls the coordinator on a fixed cadence and runs every
/// actionable job through a [`JobPipeline`] on the bounded scheduler.
pub struct Agent {
    ctx: Arc<AgentContext>,
    pipeline: Arc<JobPipeline>,
    scheduler: Arc<JobScheduler>,
}

impl Agent {
    pub fn new(ctx: Arc<AgentContext>) -> Self {
        let scheduler = JobScheduler::new(ctx.config.concurrency.max_concurrent_jobs);
        Self {
            pipeline: Arc::new(JobPipeline::new(ctx.clone())),
            scheduler: Arc::new(scheduler),
            ctx,
        }
    }

    /// Actionable jobs assigned to this node. Never fails: a poll error is
    /// logged and yields nothing.
    pub async fn poll(&self) -> Vec<Job> {
        let jobs = match self.ctx.coordinator.assigned_jobs(&self.ctx.node_id).await {
            Ok(jobs) => {
                record_poll("ok");
                jobs
            }
            Err(e) => {
                record_poll("error");
                tracing::warn!(node_id = %self.ctx.node_id, kind = e.kind(), error = %e, "Job poll failed");
                return Vec::new();
            }
        };

        let total = jobs.len();
        let mut seen = HashSet::new();
        let actionable: Vec<Job> = jobs
            .into_iter()
            .filter(|job| job.status.is_actionable())
            .filter(|job| seen.insert(job.job_id.clone()))
            .collect();
        tracing::debug!(total, actionable = actionable.len(), "Polled coordinator");
        actionable
    }

    /// Hand `job` to the scheduler unless its id is already in flight.
    fn dispatch(
        &self,
        job: Job,
        tasks: &mut JoinSet<Result<JobOutcome>>,
        cancel: &CancellationToken,
    ) {
        let Some(lane) = self.scheduler.try_reserve(&job.job_id) else {
            tracing::debug!(job_id = %job.job_id, "Job already in flight");
            return;
        };
        let pipeline = self.pipeline.clone();
        let scheduler = self.scheduler.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            scheduler
                .run(lane, move || async move { pipeline.run(job, &cancel).await })
                .await
        });
    }

    /// Poll once, run every actionable job, and wait for all of them.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Vec<JobOutcome> {
        let mut tasks = JoinSet::new();
        for job in self.poll().await {
            self.dispatch(job, &mut tasks, cancel);
        }
        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            if let Some(outcome) = settle(joined) {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    /// Poll until `cancel` fires, then wait for in-flight jobs to finish
    /// their current stage and clean up.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(self.ctx.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tasks: JoinSet<Result<JobOutcome>> = JoinSet::new();

        tracing::info!(
            node_id = %self.ctx.node_id,
            provider = %self.ctx.provider_address(),
            interval_ms = self.ctx.config.coordinator.poll_interval_ms,
            "Agent started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    for job in self.poll().await {
                        self.dispatch(job, &mut tasks, &cancel);
                    }
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    settle(joined);
                }
            }
        }

        tracing::info!(in_flight = tasks.len(), "Shutdown requested; waiting for in-flight jobs");
        while let Some(joined) = tasks.join_next().await {
            settle(joined);
        }
        tracing::info!("Agent stopped");
        Ok(())
    }
}

fn settle(
    joined: std::result::Result<Result<JobOutcome>, tokio::task::JoinError>,
) -> Option<JobOutcome> {
    match joined {
        Ok(Ok(outcome)) => {
            tracing::info!(
                job_id = %outcome.job_id,
                state = %outcome.state,
                elapsed_ms = outcome.elapsed.as_millis() as u64,
                "Job finished"
            );
            Some(outcome)
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Job could not be scheduled");
            None
        }
        Err(e) if e.is_panic() => {
            tracing::error!(error = %e, "Job task panicked");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "Job task cancelled");
            None
        }
    }
}
