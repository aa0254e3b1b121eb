//! Job lifecycle controller for the node agent.
//!
//! This crate turns jobs assigned by the coordinator into reported results:
//!
//! - [`Agent`]: poll loop, bounded scheduling, graceful shutdown
//! - [`JobPipeline`]: per-job state machine (claim, fetch, execute, hash, report)
//! - [`Workspace`]: job-scoped directories with guaranteed cleanup
//! - [`Fetcher`], [`Claimer`], [`Reporter`]: the stage implementations

pub mod agent;
pub mod claimer;
pub mod context;
pub mod digest;
pub mod fetcher;
pub mod lifecycle;
pub mod reporter;
pub mod scheduler;
pub mod workspace;

pub use agent::Agent;
pub use claimer::Claimer;
pub use context::{AgentContext, AgentContextBuilder};
pub use digest::{digest_output, digest_tree};
pub use fetcher::{DatasetRef, Fetcher};
pub use lifecycle::{bounded_tail, JobOutcome, JobPipeline, JobState};
pub use reporter::{Reporter, RetryPolicy};
pub use scheduler::{JobScheduler, LaneGuard};
pub use workspace::{reclaim_orphans, Workspace};
