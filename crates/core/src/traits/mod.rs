//! Collaborator traits for the node agent.
//!
//! - `coordinator`: the coordinating scheduler's HTTP surface
//! - `content`: content-addressed dataset resolution

pub mod content;
pub mod coordinator;

pub use content::*;
pub use coordinator::*;
