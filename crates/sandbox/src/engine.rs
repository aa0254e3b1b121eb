//! Sandbox execution engine.
//!
//! This module provides the `SandboxEngine` trait and a Docker-based
//! implementation using the `bollard` crate. Each job runs in a fresh
//! container with no network, a read-only root filesystem, dropped
//! capabilities, resource ceilings, and only the job workspace mounted.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use node_agent_core::config::SandboxSettings;
use node_agent_core::{Error, Result, Stage, WorkspacePaths};

/// Mount point of the workspace inside the container.
const CONTAINER_WORKDIR: &str = "/workspace";

/// Label marking containers created by this agent.
const MANAGED_BY_LABEL: &str = "managed-by";
const MANAGED_BY_VALUE: &str = "node-agent";

/// Captured stdout/stderr beyond this is dropped.
const MAX_CAPTURED_BYTES: usize = 1024 * 1024;

// =============================================================================
// Sandbox Types
// =============================================================================

/// Resource ceilings applied to one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxLimits {
    /// Maximum memory in bytes.
    pub memory_limit: i64,
    /// CPU quota per 100ms period (100_000 = one core).
    pub cpu_quota: i64,
    /// Maximum number of processes.
    pub pids_limit: i64,
    /// Wall-clock budget for the run.
    pub timeout: Duration,
}

impl SandboxLimits {
    pub fn from_settings(settings: &SandboxSettings, timeout: Duration) -> Self {
        Self {
            memory_limit: settings.memory_limit_bytes,
            cpu_quota: settings.cpu_quota,
            pids_limit: settings.pids_limit,
            timeout,
        }
    }
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            memory_limit: 512 * 1024 * 1024, // 512MB
            cpu_quota: 100_000,              // 1 CPU core
            pids_limit: 100,
            timeout: Duration::from_secs(900),
        }
    }
}

/// Result of a completed sandbox run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Exit code of the job's program.
    pub exit_code: i64,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

impl ExecutionRecord {
    /// Whether the program exited zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Combined log text, stdout first.
    pub fn logs(&self) -> String {
        let mut logs = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !logs.is_empty() && !logs.ends_with('\n') {
                logs.push('\n');
            }
            logs.push_str(&self.stderr);
        }
        logs
    }
}

// =============================================================================
// Sandbox Engine Trait
// =============================================================================

/// Trait for sandbox execution backends.
///
/// A conforming backend runs `image` with `workspace.input` readable,
/// `workspace.output` writable, nothing else of the host visible, no network,
/// and the given limits. A non-zero exit is a successful run; only faults of
/// the execution environment are errors.
#[async_trait]
pub trait SandboxEngine: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &str;

    /// Run the image against the workspace and capture its logs.
    async fn run(
        &self,
        image: &str,
        workspace: &WorkspacePaths,
        limits: &SandboxLimits,
    ) -> Result<ExecutionRecord>;

    /// Check if the sandbox backend is available (e.g., Docker daemon running).
    async fn is_available(&self) -> bool;
}

// =============================================================================
// Docker Sandbox Implementation
// =============================================================================

/// Docker-based sandbox engine using the `bollard` crate.
///
/// Creates one container per run with:
/// - `network_mode: none`
/// - read-only root filesystem; `input` mounted read-only, `output` writable
/// - memory, CPU and pids limits
/// - all capabilities dropped and `no-new-privileges`
/// - the job runs as the uid:gid owning the workspace
/// - wall-clock timeout enforcement (container killed on expiry)
pub struct DockerSandbox {
    docker: bollard::Docker,
    pull_missing: bool,
}

impl DockerSandbox {
    /// Create a new Docker sandbox engine connecting to the local Docker daemon.
    pub fn new(pull_missing: bool) -> Result<Self> {
        let docker = bollard::Docker::connect_with_local_defaults().map_err(|e| {
            Error::sandbox_fault(format!(
                "Failed to connect to Docker daemon: {}. Is Docker running?",
                e
            ))
        })?;
        Ok(Self {
            docker,
            pull_missing,
        })
    }

    /// Create from an existing bollard Docker client (for testing).
    pub fn from_client(docker: bollard::Docker, pull_missing: bool) -> Self {
        Self {
            docker,
            pull_missing,
        }
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        use bollard::image::CreateImageOptions;
        use futures::StreamExt;

        match self.docker.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => {
                return Err(Error::sandbox_fault(format!(
                    "Failed to inspect image '{}': {}",
                    image, e
                )))
            }
        }

        if !self.pull_missing {
            return Err(Error::sandbox_fault(format!(
                "Image '{}' is not present and pulling is disabled",
                image
            )));
        }

        tracing::info!(image = %image, "Pulling missing image");
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut progress = self.docker.create_image(Some(options), None, None);
        while let Some(step) = progress.next().await {
            step.map_err(|e| {
                Error::sandbox_fault(format!("Failed to pull image '{}': {}", image, e))
            })?;
        }
        Ok(())
    }

    async fn create(&self, name: &str, image: &str, workspace: &WorkspacePaths, limits: &SandboxLimits) -> Result<()> {
        use bollard::container::CreateContainerOptions;

        let user = workspace_user(workspace).await?;
        let container_config = container_config(image, workspace, limits, user);
        let options = CreateContainerOptions {
            name,
            platform: None,
        };

        self.docker
            .create_container(Some(options), container_config)
            .await
            .map_err(|e| Error::sandbox_fault(format!("Failed to create container: {}", e)))?;

        self.docker
            .start_container::<String>(name, None)
            .await
            .map_err(|e| Error::sandbox_fault(format!("Failed to start container: {}", e)))?;

        tracing::debug!(container = %name, image = %image, "Sandbox container started");
        Ok(())
    }

    async fn wait(&self, name: &str) -> Result<i64> {
        use bollard::container::WaitContainerOptions;
        use futures::StreamExt;

        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(name, Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as an error carrying the code
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(Error::sandbox_fault(format!(
                "Failed waiting for container: {}",
                e
            ))),
            None => Err(Error::sandbox_fault(
                "Container wait stream ended without a status",
            )),
        }
    }

    async fn collect_logs(&self, name: &str) -> (String, String) {
        use bollard::container::{LogOutput, LogsOptions};
        use futures::StreamExt;

        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut output = self.docker.logs(name, Some(options));
        while let Some(msg) = output.next().await {
            match msg {
                Ok(LogOutput::StdOut { message }) => {
                    append_bounded(&mut stdout, &String::from_utf8_lossy(&message));
                }
                Ok(LogOutput::StdErr { message }) => {
                    append_bounded(&mut stderr, &String::from_utf8_lossy(&message));
                }
                Ok(_) => {} // ignore stdin/console
                Err(e) => {
                    append_bounded(&mut stderr, &format!("\n[sandbox log error: {}]", e));
                    break;
                }
            }
        }
        (stdout, stderr)
    }

    /// Force-remove every container this agent labelled, left behind by a
    /// previous process. Returns the removed container ids.
    pub async fn reclaim_containers(&self) -> Result<Vec<String>> {
        use bollard::container::ListContainersOptions;

        let options = ListContainersOptions::<String> {
            all: true,
            filters: HashMap::from([(
                "label".to_string(),
                vec![format!("{}={}", MANAGED_BY_LABEL, MANAGED_BY_VALUE)],
            )]),
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| Error::sandbox_fault(format!("Failed to list containers: {}", e)))?;

        let mut reclaimed = Vec::new();
        for id in containers.into_iter().filter_map(|c| c.id) {
            tracing::warn!(container = %id, "Removing orphaned sandbox container");
            remove_container(&self.docker, &id).await;
            reclaimed.push(id);
        }
        Ok(reclaimed)
    }

    async fn run_container(
        &self,
        name: &str,
        image: &str,
        workspace: &WorkspacePaths,
        limits: &SandboxLimits,
    ) -> Result<ExecutionRecord> {
        self.create(name, image, workspace, limits).await?;

        match tokio::time::timeout(limits.timeout, self.wait(name)).await {
            Ok(exit_code) => {
                let exit_code = exit_code?;
                let (stdout, stderr) = self.collect_logs(name).await;
                Ok(ExecutionRecord {
                    exit_code,
                    stdout,
                    stderr,
                })
            }
            Err(_) => {
                tracing::warn!(container = %name, timeout = ?limits.timeout, "Sandbox run timed out");
                if let Err(e) = self.docker.kill_container::<String>(name, None).await {
                    tracing::debug!(container = %name, error = %e, "Kill after timeout failed");
                }
                Err(Error::Timeout {
                    stage: Stage::Executing,
                    after: limits.timeout,
                })
            }
        }
    }
}

fn append_bounded(buf: &mut String, chunk: &str) {
    let room = MAX_CAPTURED_BYTES.saturating_sub(buf.len());
    if room == 0 {
        return;
    }
    if chunk.len() <= room {
        buf.push_str(chunk);
    } else {
        let mut end = room;
        while !chunk.is_char_boundary(end) {
            end -= 1;
        }
        buf.push_str(&chunk[..end]);
    }
}

/// `uid:gid` owning the workspace output tree; the job runs as this user so
/// the agent can read and remove whatever it writes.
#[cfg(unix)]
async fn workspace_user(workspace: &WorkspacePaths) -> Result<Option<String>> {
    use std::os::unix::fs::MetadataExt;

    let meta = tokio::fs::metadata(&workspace.output).await?;
    Ok(Some(format!("{}:{}", meta.uid(), meta.gid())))
}

#[cfg(not(unix))]
async fn workspace_user(_workspace: &WorkspacePaths) -> Result<Option<String>> {
    Ok(None)
}

fn container_config(
    image: &str,
    workspace: &WorkspacePaths,
    limits: &SandboxLimits,
    user: Option<String>,
) -> bollard::container::Config<String> {
    use bollard::models::HostConfig;

    let host_config = HostConfig {
        binds: Some(vec![
            format!("{}:{}/input:ro", workspace.input.display(), CONTAINER_WORKDIR),
            format!("{}:{}/output:rw", workspace.output.display(), CONTAINER_WORKDIR),
        ]),
        memory: Some(limits.memory_limit),
        memory_swap: Some(limits.memory_limit),
        cpu_quota: Some(limits.cpu_quota),
        cpu_period: Some(100_000), // standard 100ms period
        network_mode: Some("none".to_string()),
        readonly_rootfs: Some(true),
        // Scratch space for programs that insist on /tmp
        tmpfs: Some(HashMap::from([(
            "/tmp".to_string(),
            "rw,noexec,nosuid,size=64m".to_string(),
        )])),
        cap_drop: Some(vec!["ALL".to_string()]),
        security_opt: Some(vec!["no-new-privileges:true".to_string()]),
        pids_limit: Some(limits.pids_limit),
        ..Default::default()
    };

    bollard::container::Config {
        image: Some(image.to_string()),
        user,
        working_dir: Some(CONTAINER_WORKDIR.to_string()),
        env: Some(vec![
            format!("INPUT_DIR={}/input", CONTAINER_WORKDIR),
            format!("OUTPUT_DIR={}/output", CONTAINER_WORKDIR),
        ]),
        network_disabled: Some(true),
        host_config: Some(host_config),
        labels: Some(HashMap::from([(
            MANAGED_BY_LABEL.to_string(),
            MANAGED_BY_VALUE.to_string(),
        )])),
        ..Default::default()
    }
}

async fn remove_container(docker: &bollard::Docker, name: &str) {
    use bollard::container::RemoveContainerOptions;

    let options = RemoveContainerOptions {
        force: true,
        ..Default::default()
    };
    if let Err(e) = docker.remove_container(name, Some(options)).await {
        tracing::warn!(container = %name, error = %e, "Failed to remove sandbox container");
    }
}

/// Removes the container in the background if `run` is dropped before it
/// could remove it itself.
struct ContainerGuard {
    docker: bollard::Docker,
    name: String,
    armed: bool,
}

impl ContainerGuard {
    fn new(docker: bollard::Docker, name: &str) -> Self {
        Self {
            docker,
            name: name.to_string(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let docker = self.docker.clone();
        let name = std::mem::take(&mut self.name);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!(container = %name, "Sandbox run abandoned; removing container");
                handle.spawn(async move { remove_container(&docker, &name).await });
            }
            Err(_) => {
                tracing::warn!(container = %name, "No runtime left to remove sandbox container");
            }
        }
    }
}

#[async_trait]
impl SandboxEngine for DockerSandbox {
    fn name(&self) -> &str {
        "docker"
    }

    async fn run(
        &self,
        image: &str,
        workspace: &WorkspacePaths,
        limits: &SandboxLimits,
    ) -> Result<ExecutionRecord> {
        self.ensure_image(image).await?;

        let name = format!("node-agent-{}", uuid::Uuid::new_v4());
        let mut guard = ContainerGuard::new(self.docker.clone(), &name);
        let result = self.run_container(&name, image, workspace, limits).await;
        remove_container(&self.docker, &name).await;
        guard.disarm();

        if let Ok(ref record) = result {
            tracing::info!(container = %name, image = %image, exit_code = record.exit_code, "Sandbox run finished");
        }
        result
    }

    async fn is_available(&self) -> bool {
        self.docker.ping().await.is_ok()
    }
}

// =============================================================================
// Mock Sandbox (for testing without Docker)
// =============================================================================

/// Scripted behaviour of one mock run.
#[derive(Debug, Clone)]
pub enum MockRun {
    /// Write `outputs` (relative path, bytes) into the output tree and exit.
    Exit {
        code: i64,
        stdout: String,
        outputs: Vec<(String, Vec<u8>)>,
    },
    /// Fail as the execution environment would.
    Fault(String),
    /// Never finish; times out after the run's limit.
    Hang,
    /// Panic mid-run.
    Panic,
}

impl MockRun {
    /// Exit zero after writing the given outputs.
    pub fn ok(outputs: Vec<(&str, &[u8])>) -> Self {
        MockRun::Exit {
            code: 0,
            stdout: "[mock] job executed".to_string(),
            outputs: outputs
                .into_iter()
                .map(|(path, bytes)| (path.to_string(), bytes.to_vec()))
                .collect(),
        }
    }
}

/// In-process mock sandbox for unit testing.
///
/// With no scripted runs left it copies the dataset to `output/result.bin`
/// and exits zero.
pub struct MockSandbox {
    runs: Mutex<VecDeque<MockRun>>,
    invocations: AtomicUsize,
    available: bool,
}

impl Default for MockSandbox {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl MockSandbox {
    /// Create a mock sandbox with predefined runs.
    pub fn new(runs: Vec<MockRun>) -> Self {
        Self {
            runs: Mutex::new(runs.into()),
            invocations: AtomicUsize::new(0),
            available: true,
        }
    }

    /// A mock whose backend reports itself unavailable.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::default()
        }
    }

    /// Number of times `run` was called.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SandboxEngine for MockSandbox {
    fn name(&self) -> &str {
        "mock"
    }

    async fn run(
        &self,
        _image: &str,
        workspace: &WorkspacePaths,
        limits: &SandboxLimits,
    ) -> Result<ExecutionRecord> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let next = self.runs.lock().unwrap().pop_front();
        match next {
            Some(MockRun::Exit {
                code,
                stdout,
                outputs,
            }) => {
                for (path, bytes) in outputs {
                    let target = workspace.output.join(path);
                    if let Some(parent) = target.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    tokio::fs::write(target, bytes).await?;
                }
                Ok(ExecutionRecord {
                    exit_code: code,
                    stdout,
                    stderr: String::new(),
                })
            }
            Some(MockRun::Fault(msg)) => Err(Error::sandbox_fault(msg)),
            Some(MockRun::Hang) => {
                tokio::time::sleep(limits.timeout).await;
                Err(Error::Timeout {
                    stage: Stage::Executing,
                    after: limits.timeout,
                })
            }
            Some(MockRun::Panic) => panic!("mock sandbox panicked mid-run"),
            None => {
                let dataset = tokio::fs::read(workspace.dataset()).await.unwrap_or_default();
                tokio::fs::write(workspace.output.join("result.bin"), &dataset).await?;
                Ok(ExecutionRecord {
                    exit_code: 0,
                    stdout: format!("[mock] processed {} bytes", dataset.len()),
                    stderr: String::new(),
                })
            }
        }
    }

    async fn is_available(&self) -> bool {
        self.available
    }
}

// =============================================================================
// Tests
// =============================================================================
