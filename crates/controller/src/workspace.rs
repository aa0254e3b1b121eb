//! Job-scoped ephemeral workspaces.
//!
//! Each pipeline run owns exactly one directory under the workspace root,
//! named `<sanitized-job-id>.<uuid>` so that a second run of the same job id
//! never shares it and a leftover directory can be attributed to its job.

use std::path::{Path, PathBuf};

use node_agent_core::{Result, WorkspacePaths};

/// Longest job-id prefix kept in a directory name.
const MAX_PREFIX_LEN: usize = 64;

/// Length of a simple-formatted UUID suffix.
const SUFFIX_LEN: usize = 32;

/// An owned workspace directory. Removed on [`Workspace::cleanup`], or on
/// drop if cleanup never ran (failure paths, panics, cancelled futures).
#[derive(Debug)]
pub struct Workspace {
    job_id: String,
    paths: WorkspacePaths,
    removed: bool,
}

impl Workspace {
    /// Create a fresh workspace for `job_id` with empty `input/` and `output/`.
    pub async fn create(root: &Path, job_id: &str) -> Result<Self> {
        let dir = root.join(format!(
            "{}.{}",
            sanitize(job_id),
            uuid::Uuid::new_v4().simple()
        ));
        let paths = WorkspacePaths::under(&dir);

        // Guard owns the directory from here on, so a partial create is removed too
        let workspace = Self {
            job_id: job_id.to_string(),
            paths,
            removed: false,
        };
        tokio::fs::create_dir_all(&workspace.paths.input).await?;
        tokio::fs::create_dir_all(&workspace.paths.output).await?;

        tracing::debug!(job_id = %job_id, path = %dir.display(), "Workspace created");
        Ok(workspace)
    }

    pub fn paths(&self) -> &WorkspacePaths {
        &self.paths
    }

    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    /// Remove the workspace directory and everything in it.
    pub async fn cleanup(mut self) -> Result<()> {
        self.removed = true;
        match tokio::fs::remove_dir_all(&self.paths.root).await {
            Ok(()) => {
                tracing::debug!(job_id = %self.job_id, "Workspace removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        match std::fs::remove_dir_all(&self.paths.root) {
            Ok(()) => {
                tracing::debug!(job_id = %self.job_id, "Workspace removed on drop");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    job_id = %self.job_id,
                    path = %self.paths.root.display(),
                    error = %e,
                    "Failed to remove workspace"
                );
            }
        }
    }
}

/// Map a job id onto a safe single path component.
fn sanitize(job_id: &str) -> String {
    let cleaned: String = job_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_PREFIX_LEN)
        .collect();
    if cleaned.is_empty() {
        "job".to_string()
    } else {
        cleaned
    }
}

/// Job id prefix of a workspace directory name, if it is one.
fn parse_dir_name(name: &str) -> Option<&str> {
    let (prefix, suffix) = name.rsplit_once('.')?;
    let is_uuid = suffix.len() == SUFFIX_LEN && suffix.bytes().all(|b| b.is_ascii_hexdigit());
    (is_uuid && !prefix.is_empty()).then_some(prefix)
}

/// Remove workspaces left behind by a previous process.
///
/// Must run before any job starts. Creates `root` if it does not exist and
/// returns the (sanitized) job ids of the reclaimed workspaces.
pub async fn reclaim_orphans(root: &Path) -> Result<Vec<String>> {
    tokio::fs::create_dir_all(root).await?;

    let mut reclaimed = Vec::new();
    let mut entries = tokio::fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path: PathBuf = entry.path();
        let name = entry.file_name();
        let Some(job_id) = name.to_str().and_then(parse_dir_name) else {
            tracing::warn!(path = %path.display(), "Ignoring unrecognised entry in workspace root");
            continue;
        };
        if !entry.file_type().await?.is_dir() {
            continue;
        }

        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {
                tracing::warn!(job_id = %job_id, path = %path.display(), "Reclaimed orphaned workspace");
                reclaimed.push(job_id.to_string());
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, path = %path.display(), error = %e, "Failed to reclaim orphaned workspace");
            }
        }
    }
    Ok(reclaimed)
}
