//! Remote collaborators of the node agent.
//!
//! - [`HttpCoordinator`]: the coordinator's node-facing HTTP API
//! - [`HttpUrlSource`]: plain HTTP(S) dataset URLs
//! - [`HttpContentStore`]: content-addressed datasets via an HTTP gateway
//! - [`transfer`]: streamed downloads and HTTP error classification

pub mod client;
pub mod content;
pub mod transfer;

pub use client::{HttpCoordinator, IDEMPOTENCY_HEADER};
pub use content::{HttpContentStore, HttpUrlSource};
pub use transfer::download_to;
