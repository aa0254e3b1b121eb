//! Sandbox for job execution.
//!
//! This crate provides the isolation boundary the agent runs job images in.
//! Every run gets its own container; the only host paths it can see are the
//! job workspace's `input` (read-only) and `output` (writable) directories.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │  Job Lifecycle Controller              │
//! │    ↓ Executing stage                   │
//! ├────────────────────────────────────────┤
//! │  Sandbox Engine (DockerSandbox)        │
//! │    ↓ Docker API via bollard            │
//! ├────────────────────────────────────────┤
//! │  Docker Container (isolated)           │
//! │    /workspace/input   (bind, ro)       │
//! │    /workspace/output  (bind, rw)       │
//! │    No network, no caps, ro rootfs      │
//! └────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use node_agent_sandbox::{DockerSandbox, SandboxEngine, SandboxLimits};
//!
//! let engine = DockerSandbox::new(true)?;
//! let record = engine.run("python:3.12-slim", &workspace.paths(), &SandboxLimits::default()).await?;
//! ```

pub mod engine;

pub use engine::{
    DockerSandbox, ExecutionRecord, MockRun, MockSandbox, SandboxEngine, SandboxLimits,
};
