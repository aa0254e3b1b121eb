//! Content store contract.

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;

/// Resolver for content-addressed dataset references.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Probe whether the store can serve requests right now.
    async fn is_available(&self) -> bool;

    /// Write the content identified by `cid` to `dest`, refusing more than
    /// `max_bytes`. Returns the number of bytes written.
    async fn fetch_to(&self, cid: &str, dest: &Path, max_bytes: u64) -> Result<u64>;
}
