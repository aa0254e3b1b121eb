//! Result, digest, and acknowledgement types.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::types::JobId;

/// Prefix declaring the digest encoding.
pub const DIGEST_PREFIX: &str = "0x";

/// `0x`-prefixed lowercase hex of a 256-bit digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Encode raw digest bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self(format!("{}{}", DIGEST_PREFIX, hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a string is a prefixed, lowercase, 64-nibble hex digest.
    pub fn is_well_formed(value: &str) -> bool {
        value
            .strip_prefix(DIGEST_PREFIX)
            .map(|hex| {
                hex.len() == 64
                    && hex
                        .bytes()
                        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
            })
            .unwrap_or(false)
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable result of one job execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultSubmission {
    pub job_id: JobId,
    pub node_id: String,
    pub digest: Digest,
    pub logs: String,
}

impl ResultSubmission {
    pub fn new(
        job_id: impl Into<String>,
        node_id: impl Into<String>,
        digest: Digest,
        logs: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            node_id: node_id.into(),
            digest,
            logs: logs.into(),
        }
    }

    /// Key identifying this submission across retries.
    ///
    /// Identical for every attempt of the same `(job, node, digest)`, so a
    /// coordinator can collapse duplicate deliveries into one result.
    pub fn idempotency_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.job_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.node_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.digest.as_str().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Coordinator acknowledgement of a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub status: u16,
    #[serde(default)]
    pub body: serde_json::Value,
}

impl Ack {
    pub fn ok(body: serde_json::Value) -> Self {
        Self { status: 200, body }
    }
}

/// Outcome of an attempt to become a job's provider.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// This node is now the job's provider.
    Claimed(Ack),
    /// Another provider won, or the job is no longer claimable.
    Lost { reason: String },
}

impl ClaimOutcome {
    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimOutcome::Claimed(_))
    }
}
