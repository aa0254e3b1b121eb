//! Dataset retrieval into a job workspace.
//!
//! References are resolved by scheme:
//! - `http://` / `https://` URLs go to the HTTP source
//! - `ipfs://<cid>` or a bare CID (`Qm...`, `bafy...`) go to the content store
//!
//! Anything else is a permanent input error. Retryable failures are retried a
//! bounded number of times within the same attempt.

use std::sync::Arc;
use std::time::Duration;

use node_agent_core::config::FetchConfig;
use node_agent_core::{ContentStore, Error, Result, WorkspacePaths};

/// A parsed dataset reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetRef<'a> {
    /// Full HTTP(S) URL.
    Http(&'a str),
    /// Content identifier without scheme.
    ContentAddressed(&'a str),
}

impl<'a> DatasetRef<'a> {
    /// Classify a reference. Unsupported or malformed references are
    /// [`Error::PermanentInput`].
    pub fn parse(reference: &'a str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(Error::permanent_input("Empty dataset reference"));
        }

        let lower = reference.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Ok(DatasetRef::Http(reference));
        }
        if lower.starts_with("ipfs://") {
            let cid = reference["ipfs://".len()..].trim_matches('/');
            if cid.is_empty() {
                return Err(Error::permanent_input(format!(
                    "Dataset reference '{}' has no content identifier",
                    reference
                )));
            }
            return Ok(DatasetRef::ContentAddressed(cid));
        }
        if looks_like_cid(reference) {
            return Ok(DatasetRef::ContentAddressed(reference));
        }

        match reference.split_once("://") {
            Some((scheme, _)) => Err(Error::permanent_input(format!(
                "Unsupported dataset scheme '{}'",
                scheme
            ))),
            None => Err(Error::permanent_input(format!(
                "Unrecognised dataset reference '{}'",
                reference
            ))),
        }
    }
}

/// CIDv0 (base58 `Qm...`, 46 chars) or base32 CIDv1 (`bafy...`).
fn looks_like_cid(s: &str) -> bool {
    let alnum = s.bytes().all(|b| b.is_ascii_alphanumeric());
    (s.starts_with("Qm") && s.len() == 46 && alnum)
        || (s.starts_with("bafy") && s.len() > 50 && alnum)
}

// =============================================================================
// Fetcher
// =============================================================================

/// Resolves dataset references into `input/dataset`.
pub struct Fetcher {
    http: Arc<dyn ContentStore>,
    content: Option<Arc<dyn ContentStore>>,
    max_bytes: u64,
    retries: u32,
    retry_delay: Duration,
}

impl Fetcher {
    pub fn new(http: Arc<dyn ContentStore>, config: &FetchConfig) -> Self {
        Self {
            http,
            content: None,
            max_bytes: config.max_download_bytes,
            retries: config.retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    /// Set the store serving content-addressed references.
    pub fn with_content_store(mut self, store: Arc<dyn ContentStore>) -> Self {
        self.content = Some(store);
        self
    }

    /// Probe the content store once and disable it if unavailable, so that
    /// content-addressed jobs fail fast instead of timing out one by one.
    pub async fn probe(mut self) -> Self {
        if let Some(store) = &self.content {
            if store.is_available().await {
                tracing::info!(store = store.name(), "Content store available");
            } else {
                tracing::warn!(
                    store = store.name(),
                    "Content store unavailable; content-addressed datasets will be rejected"
                );
                self.content = None;
            }
        }
        self
    }

    pub fn content_addressing_enabled(&self) -> bool {
        self.content.is_some()
    }

    /// Fetch `reference` into the workspace's dataset file.
    pub async fn fetch(&self, reference: &str, paths: &WorkspacePaths) -> Result<u64> {
        let (source, key) = match DatasetRef::parse(reference)? {
            DatasetRef::Http(url) => (&self.http, url),
            DatasetRef::ContentAddressed(cid) => match &self.content {
                Some(store) => (store, cid),
                None => {
                    return Err(Error::scheme_unavailable(format!(
                        "No content store available to resolve '{}'",
                        reference
                    )))
                }
            },
        };

        let dest = paths.dataset();
        let mut attempt: u32 = 1;
        loop {
            match source.fetch_to(key, &dest, self.max_bytes).await {
                Ok(bytes) => {
                    tracing::debug!(source = source.name(), bytes, attempt, "Dataset fetched");
                    return Ok(bytes);
                }
                Err(e) if e.is_retryable() && attempt <= self.retries => {
                    tracing::warn!(
                        source = source.name(),
                        attempt,
                        error = %e,
                        "Dataset fetch failed, retrying"
                    );
                    tokio::time::sleep(self.retry_delay * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
