//! Core type definitions for the node agent.
//!
//! Broken down into submodules by concern.

pub mod job;
pub mod node;
pub mod result;
pub mod stage;
pub mod workspace;

pub use job::*;
pub use node::*;
pub use result::*;
pub use stage::*;
pub use workspace::*;
