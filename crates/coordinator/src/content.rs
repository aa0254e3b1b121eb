//! Dataset sources: plain HTTP(S) URLs and content-addressed retrieval
//! through an HTTP gateway.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use node_agent_core::{ContentStore, Error, Result};

use crate::transfer::download_to;

// =============================================================================
// Direct URL source
// =============================================================================

/// Streams `http://` and `https://` dataset URLs straight to disk.
///
/// Implements [`ContentStore`] with the full URL as the key so the fetcher can
/// treat every scheme the same way.
pub struct HttpUrlSource {
    client: reqwest::Client,
}

impl HttpUrlSource {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ContentStore for HttpUrlSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn fetch_to(&self, url: &str, dest: &Path, max_bytes: u64) -> Result<u64> {
        download_to(&self.client, url, dest, max_bytes).await
    }
}

// =============================================================================
// Gateway content store
// =============================================================================

/// Resolves CIDs through a gateway serving `/ipfs/<cid>`.
pub struct HttpContentStore {
    client: reqwest::Client,
    gateway: String,
}

impl HttpContentStore {
    pub fn new(gateway: &str, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            gateway: gateway.trim_end_matches('/').to_string(),
        })
    }

    fn object_url(&self, cid: &str) -> String {
        format!("{}/ipfs/{}", self.gateway, cid)
    }
}

#[async_trait]
impl ContentStore for HttpContentStore {
    fn name(&self) -> &str {
        "http-gateway"
    }

    async fn is_available(&self) -> bool {
        match self.client.get(&self.gateway).send().await {
            Ok(resp) => !resp.status().is_server_error(),
            Err(e) => {
                tracing::debug!(gateway = %self.gateway, error = %e, "Content gateway probe failed");
                false
            }
        }
    }

    async fn fetch_to(&self, cid: &str, dest: &Path, max_bytes: u64) -> Result<u64> {
        download_to(&self.client, &self.object_url(cid), dest, max_bytes).await
    }
}
