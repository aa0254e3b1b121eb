//! Streamed downloads to disk with response classification.

use futures::StreamExt;
use std::path::Path;
use tokio::io::AsyncWriteExt;

use node_agent_core::{Error, Result};

/// Map a transport-level reqwest failure onto the agent's taxonomy.
pub fn classify_transport(context: &str, err: reqwest::Error) -> Error {
    if err.is_builder() {
        Error::permanent_input(format!("{}: invalid request: {}", context, err))
    } else {
        // connect, timeout, body and decode failures are worth another attempt
        Error::transient(format!("{}: {}", context, err))
    }
}

/// Map a non-success HTTP status onto the agent's taxonomy.
///
/// 5xx and 429 are transient; every other non-2xx is a permanent rejection.
pub fn classify_status(context: &str, status: reqwest::StatusCode, body: &str) -> Error {
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        Error::transient(format!("{}: HTTP {}: {}", context, status, body))
    } else {
        Error::Rejected {
            status: status.as_u16(),
            message: format!("{}: {}", context, body),
        }
    }
}

/// GET `url` and stream the body into `dest`, refusing more than `max_bytes`.
///
/// Returns the number of bytes written. A partially written file is left for
/// the caller's workspace cleanup to remove.
pub async fn download_to(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    max_bytes: u64,
) -> Result<u64> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| classify_transport("Download failed", e))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(match classify_status("Download failed", status, &body) {
            Error::Rejected { status, message } => {
                Error::permanent_input(format!("HTTP {} fetching {}: {}", status, url, message))
            }
            other => other,
        });
    }

    // Check Content-Length if present
    if let Some(len) = resp.content_length() {
        if len > max_bytes {
            return Err(Error::permanent_input(format!(
                "Content-Length {} exceeds limit {}",
                len, max_bytes
            )));
        }
    }

    let mut file = tokio::fs::File::create(dest).await?;
    let mut stream = resp.bytes_stream();
    let mut total: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| classify_transport("Download interrupted", e))?;
        total += chunk.len() as u64;
        if total > max_bytes {
            return Err(Error::permanent_input(format!(
                "Response size exceeded limit ({} bytes)",
                max_bytes
            )));
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    tracing::debug!(url = %url, bytes = total, dest = %dest.display(), "Download complete");
    Ok(total)
}
