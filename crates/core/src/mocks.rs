//! Mock implementations of core traits for testing.
//!
//! These mocks are shared by the unit and integration tests of every crate in
//! the workspace, so they live in the library rather than behind `cfg(test)`.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::{
    traits::{ContentStore, Coordinator},
    types::{Ack, ClaimOutcome, Job, JobStatus, NodeRegistration, ResultSubmission},
    Error, Result,
};

// =============================================================================
// Mock Coordinator
// =============================================================================

/// A result as the coordinator recorded it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedResult {
    pub job_id: String,
    pub node_id: String,
    pub result_hash: String,
    pub logs: String,
}

#[derive(Default)]
struct CoordinatorState {
    jobs: Vec<Job>,
    /// job id -> winning provider
    providers: HashMap<String, String>,
    /// idempotency key -> recorded result
    results: HashMap<String, RecordedResult>,
    claim_attempts: usize,
    submit_attempts: usize,
    poll_failures: usize,
    claim_failures: usize,
    submit_failures: VecDeque<Error>,
    registered: Vec<NodeRegistration>,
}

/// In-memory coordinator that arbitrates claims first-come-first-served and
/// deduplicates results by idempotency key.
#[derive(Default)]
pub struct MockCoordinator {
    state: Mutex<CoordinatorState>,
}

impl MockCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the coordinator with jobs returned to every node.
    pub fn with_jobs(jobs: Vec<Job>) -> Self {
        let mock = Self::new();
        mock.state.lock().unwrap().jobs = jobs;
        mock
    }

    /// Fail the next `n` polls with a transient error.
    pub fn fail_polls(&self, n: usize) {
        self.state.lock().unwrap().poll_failures = n;
    }

    /// Fail the next `n` claims with a transient error.
    pub fn fail_claims(&self, n: usize) {
        self.state.lock().unwrap().claim_failures = n;
    }

    /// Queue errors returned by the next result submissions, in order.
    pub fn fail_submissions(&self, errors: Vec<Error>) {
        self.state.lock().unwrap().submit_failures = errors.into();
    }

    /// Record `provider` as having already won `job_id`.
    pub fn preassign(&self, job_id: &str, provider: &str) {
        self.state
            .lock()
            .unwrap()
            .providers
            .insert(job_id.to_string(), provider.to_string());
    }

    pub fn provider_of(&self, job_id: &str) -> Option<String> {
        self.state.lock().unwrap().providers.get(job_id).cloned()
    }

    /// Distinct results recorded after deduplication.
    pub fn results(&self) -> Vec<RecordedResult> {
        self.state.lock().unwrap().results.values().cloned().collect()
    }

    pub fn claim_attempts(&self) -> usize {
        self.state.lock().unwrap().claim_attempts
    }

    pub fn submit_attempts(&self) -> usize {
        self.state.lock().unwrap().submit_attempts
    }

    pub fn registrations(&self) -> Vec<NodeRegistration> {
        self.state.lock().unwrap().registered.clone()
    }
}

#[async_trait]
impl Coordinator for MockCoordinator {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn register_node(&self, registration: &NodeRegistration) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.registered.push(registration.clone());
        if registration.node_id.is_empty() {
            Ok(format!("node-{}", uuid::Uuid::new_v4()))
        } else {
            Ok(registration.node_id.clone())
        }
    }

    async fn assigned_jobs(&self, _node_id: &str) -> Result<Vec<Job>> {
        let mut state = self.state.lock().unwrap();
        if state.poll_failures > 0 {
            state.poll_failures -= 1;
            return Err(Error::transient("mock coordinator unreachable"));
        }
        Ok(state.jobs.clone())
    }

    async fn assign_provider(&self, job_id: &str, provider: &str) -> Result<ClaimOutcome> {
        let mut state = self.state.lock().unwrap();
        state.claim_attempts += 1;
        if state.claim_failures > 0 {
            state.claim_failures -= 1;
            return Err(Error::transient("mock claim transport failure"));
        }
        if !state.jobs.iter().any(|j| j.job_id == job_id) {
            return Ok(ClaimOutcome::Lost {
                reason: "Job not found".into(),
            });
        }
        match state.providers.get(job_id) {
            Some(winner) if winner != provider => Ok(ClaimOutcome::Lost {
                reason: "Job not pending".into(),
            }),
            _ => {
                state
                    .providers
                    .insert(job_id.to_string(), provider.to_string());
                if let Some(job) = state.jobs.iter_mut().find(|j| j.job_id == job_id) {
                    job.status = JobStatus::Assigned;
                    job.provider_address = Some(provider.to_string());
                }
                Ok(ClaimOutcome::Claimed(Ack::ok(
                    serde_json::json!({ "success": true }),
                )))
            }
        }
    }

    async fn submit_result(&self, submission: &ResultSubmission) -> Result<Ack> {
        let mut state = self.state.lock().unwrap();
        state.submit_attempts += 1;
        if let Some(err) = state.submit_failures.pop_front() {
            return Err(err);
        }
        state
            .results
            .entry(submission.idempotency_key())
            .or_insert_with(|| RecordedResult {
                job_id: submission.job_id.clone(),
                node_id: submission.node_id.clone(),
                result_hash: submission.digest.to_string(),
                logs: submission.logs.clone(),
            });
        if let Some(job) = state.jobs.iter_mut().find(|j| j.job_id == submission.job_id) {
            job.status = JobStatus::Completed;
            job.result_hash = Some(submission.digest.to_string());
        }
        Ok(Ack::ok(serde_json::json!({ "jobId": submission.job_id })))
    }
}

// =============================================================================
// Mock Content Store
// =============================================================================

/// In-memory content store keyed by CID (or URL, when standing in for the
/// HTTP source).
pub struct MockContentStore {
    available: bool,
    objects: Mutex<HashMap<String, Vec<u8>>>,
    transient_failures: AtomicUsize,
    fetch_attempts: AtomicUsize,
}

impl MockContentStore {
    pub fn new(available: bool) -> Self {
        Self {
            available,
            objects: Mutex::new(HashMap::new()),
            transient_failures: AtomicUsize::new(0),
            fetch_attempts: AtomicUsize::new(0),
        }
    }

    /// Fail the next `n` fetches with a transient error.
    pub fn fail_fetches(&self, n: usize) {
        self.transient_failures.store(n, Ordering::SeqCst);
    }

    pub fn fetch_attempts(&self) -> usize {
        self.fetch_attempts.load(Ordering::SeqCst)
    }

    pub fn insert(&self, cid: &str, content: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(cid.to_string(), content.to_vec());
    }
}

#[async_trait]
impl ContentStore for MockContentStore {
    fn name(&self) -> &str {
        "mock"
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn fetch_to(&self, cid: &str, dest: &Path, max_bytes: u64) -> Result<u64> {
        self.fetch_attempts.fetch_add(1, Ordering::SeqCst);
        let pending_failure = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if pending_failure {
            return Err(Error::transient(format!("mock store timed out fetching {}", cid)));
        }
        let content = self
            .objects
            .lock()
            .unwrap()
            .get(cid)
            .cloned()
            .ok_or_else(|| Error::permanent_input(format!("CID not found: {}", cid)))?;
        if content.len() as u64 > max_bytes {
            return Err(Error::permanent_input(format!(
                "Content {} exceeds limit ({} bytes)",
                cid, max_bytes
            )));
        }
        std::fs::write(dest, &content)?;
        Ok(content.len() as u64)
    }
}
