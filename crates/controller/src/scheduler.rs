use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore};

use node_agent_core::{Error, Result};

/// Dual-lane scheduler for job execution.
/// - Global lane: limits total concurrent pipelines.
/// - Job lane: at most one in-flight pipeline per job id. A job id that is
///   already running is refused rather than queued.
pub struct JobScheduler {
    global: Arc<Semaphore>,
    job_lanes: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

/// Exclusive hold on one job id's lane. Released on drop.
pub struct LaneGuard {
    job_id: String,
    lanes: Arc<DashMap<String, Arc<Mutex<()>>>>,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for LaneGuard {
    fn drop(&mut self) {
        // The map and this guard are the only holders when nobody else is
        // contending for the lane
        self.lanes
            .remove_if(&self.job_id, |_, lane| Arc::strong_count(lane) <= 2);
    }
}

impl JobScheduler {
    pub fn new(global_limit: usize) -> Self {
        Self {
            global: Arc::new(Semaphore::new(global_limit.max(1))),
            job_lanes: Arc::new(DashMap::new()),
        }
    }

    /// Take the lane for `job_id` without waiting. `None` if it is in flight.
    pub fn try_reserve(&self, job_id: &str) -> Option<LaneGuard> {
        let lane = self
            .job_lanes
            .entry(job_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lane.try_lock_owned().ok()?;
        Some(LaneGuard {
            job_id: job_id.to_string(),
            lanes: self.job_lanes.clone(),
            _guard: guard,
        })
    }

    pub fn is_in_flight(&self, job_id: &str) -> bool {
        self.job_lanes
            .get(job_id)
            .map(|lane| lane.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Number of global slots currently free.
    pub fn available_slots(&self) -> usize {
        self.global.available_permits()
    }

    /// Run `operation` once a global slot is free, holding `lane` throughout.
    pub async fn run<F, Fut, T>(&self, lane: LaneGuard, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _global_permit = self
            .global
            .acquire()
            .await
            .map_err(|_| Error::internal("Job scheduler closed"))?;
        let _lane = lane;
        Ok(operation().await)
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_job_lane_is_exclusive() {
        let scheduler = JobScheduler::new(4);
        let lane = scheduler.try_reserve("j1").unwrap();

        assert!(scheduler.is_in_flight("j1"));
        assert!(scheduler.try_reserve("j1").is_none());
        assert!(scheduler.try_reserve("j2").is_some());

        drop(lane);
        assert!(!scheduler.is_in_flight("j1"));
        assert!(scheduler.try_reserve("j1").is_some());
    }

    #[tokio::test]
    async fn test_lanes_are_pruned() {
        let scheduler = JobScheduler::new(1);
        let lane = scheduler.try_reserve("j1").unwrap();
        scheduler.run(lane, || async {}).await.unwrap();
        assert!(scheduler.job_lanes.is_empty());
    }

    #[tokio::test]
    async fn test_global_limit() {
        let scheduler = Arc::new(JobScheduler::new(2));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..6 {
            let lane = scheduler.try_reserve(&format!("j{}", i)).unwrap();
            let scheduler = scheduler.clone();
            let running = running.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                scheduler
                    .run(lane, move || async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(scheduler.available_slots(), 2);
    }
}
