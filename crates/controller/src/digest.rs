//! Deterministic digest of a workspace's output tree.
//!
//! Regular files under `output/` are hashed in byte-lexicographic order of
//! their `/`-joined relative paths. Only file contents are fed to the hasher;
//! names, sizes, timestamps and permissions are not. Symlinks are neither
//! followed nor hashed.

use std::ffi::OsStr;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest as _, Sha256};

use node_agent_core::{Digest, Error, Result, WorkspacePaths};

/// Read buffer size; bounds memory use regardless of file size.
const BUFFER_SIZE: usize = 64 * 1024;

/// Digest every regular file under `root`.
pub fn digest_tree(root: &Path) -> Result<Digest> {
    let mut files = Vec::new();
    collect_files(root, root, &mut files)?;
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; BUFFER_SIZE];
    for (_, path) in &files {
        let mut file = File::open(path)?;
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
    }

    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&hasher.finalize());
    tracing::debug!(root = %root.display(), files = files.len(), "Output tree digested");
    Ok(Digest::from_bytes(&bytes))
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<(Vec<u8>, PathBuf)>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        // DirEntry::file_type does not traverse symlinks
        let file_type = entry.file_type()?;
        let path = entry.path();
        if file_type.is_symlink() {
            continue;
        } else if file_type.is_dir() {
            collect_files(root, &path, out)?;
        } else if file_type.is_file() {
            out.push((relative_key(root, &path)?, path));
        }
    }
    Ok(())
}

/// Raw bytes of `path` relative to `root`, components joined with `/`.
fn relative_key(root: &Path, path: &Path) -> Result<Vec<u8>> {
    let rel = path
        .strip_prefix(root)
        .map_err(|e| Error::internal(format!("Path escaped output tree: {}", e)))?;
    let mut key = Vec::new();
    for (i, component) in rel.components().enumerate() {
        if i > 0 {
            key.push(b'/');
        }
        key.extend_from_slice(&component_bytes(component.as_os_str()));
    }
    Ok(key)
}

#[cfg(unix)]
fn component_bytes(name: &OsStr) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    name.as_bytes().to_vec()
}

#[cfg(not(unix))]
fn component_bytes(name: &OsStr) -> Vec<u8> {
    name.to_string_lossy().into_owned().into_bytes()
}

/// Digest the workspace's output tree on the blocking pool.
pub async fn digest_output(paths: &WorkspacePaths) -> Result<Digest> {
    let output = paths.output.clone();
    tokio::task::spawn_blocking(move || digest_tree(&output))
        .await
        .map_err(|e| Error::internal(format!("Digest task failed: {}", e)))?
}
