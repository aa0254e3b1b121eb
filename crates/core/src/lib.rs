//! Core types, traits, and error definitions for the node agent.
//!
//! This crate provides the building blocks shared by every layer of the
//! agent: the job data model, the classified error taxonomy, the collaborator
//! traits (coordinator, content store), and the layered configuration.

pub mod config;
pub mod error;
pub mod mocks;
pub mod traits;
pub mod types;

pub use config::AgentConfig;
pub use error::{Error, Result};
pub use traits::*;
pub use types::*;
