use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::Stage;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AgentConfig {
    pub node: NodeConfig,
    pub coordinator: CoordinatorConfig,
    pub workspace: WorkspaceConfig,
    pub fetch: FetchConfig,
    pub sandbox: SandboxSettings,
    pub timeouts: StageTimeouts,
    pub report: ReportConfig,
    pub concurrency: ConcurrencyConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NodeConfig {
    /// Coordinator-assigned node id. Registered at startup when absent.
    pub id: Option<String>,
    /// Stable provider identity (wallet address) used when claiming jobs.
    pub provider_address: String,
    pub gpu_name: Option<String>,
    pub gpu_specs: String,
    pub memory_mb: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CoordinatorConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WorkspaceConfig {
    /// Directory owned by the agent; every entry is a job workspace.
    pub root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FetchConfig {
    pub max_download_bytes: u64,
    /// In-process retries for retryable fetch failures.
    pub retries: u32,
    /// Delay before a fetch retry, multiplied by the attempt number.
    pub retry_delay_ms: u64,
    /// HTTP gateway for content-addressed references, e.g. `https://ipfs.io`.
    pub content_gateway: Option<String>,
}

/// What to do when the sandboxed program exits non-zero.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NonZeroExitPolicy {
    /// Hash and report whatever output exists.
    Report,
    /// Fail the job without reporting.
    Fail,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SandboxSettings {
    pub memory_limit_bytes: i64,
    /// CPU quota per 100ms period (100_000 = one core).
    pub cpu_quota: i64,
    pub pids_limit: i64,
    pub pull_missing_images: bool,
    pub non_zero_exit: NonZeroExitPolicy,
    /// Upper bound on logs attached to a result.
    pub max_log_bytes: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageTimeouts {
    pub claim_ms: u64,
    pub fetch_ms: u64,
    pub execute_ms: u64,
    pub hash_ms: u64,
    pub report_ms: u64,
}

impl StageTimeouts {
    pub fn for_stage(&self, stage: Stage) -> Duration {
        let ms = match stage {
            Stage::Claiming => self.claim_ms,
            Stage::Fetching => self.fetch_ms,
            Stage::Executing => self.execute_ms,
            Stage::Hashing => self.hash_ms,
            Stage::Reporting => self.report_ms,
        };
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReportConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConcurrencyConfig {
    pub max_concurrent_jobs: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TelemetryConfig {
    pub json_logs: bool,
    /// Address for the Prometheus scrape endpoint, e.g. `0.0.0.0:9102`.
    pub metrics_listen: Option<String>,
}

impl AgentConfig {
    /// Load layered configuration: built-in defaults, `config/default`,
    /// `config/{NODE_AGENT_ENV}`, `config/local`, then environment.
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("NODE_AGENT_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(Config::try_from(&AgentConfig::default())?)
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Map NODE_AGENT__NODE__PROVIDER_ADDRESS=0x.. to node.provider_address
            .add_source(Environment::with_prefix("NODE_AGENT").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    /// Reject settings the agent cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.node.provider_address.trim().is_empty() {
            return Err(Error::config("node.provider_address is required"));
        }
        if self.coordinator.base_url.trim().is_empty() {
            return Err(Error::config("coordinator.base_url is required"));
        }
        if self.coordinator.poll_interval_ms == 0 {
            return Err(Error::config("coordinator.poll_interval_ms must be > 0"));
        }
        if self.report.max_attempts == 0 {
            return Err(Error::config("report.max_attempts must be > 0"));
        }
        if self.concurrency.max_concurrent_jobs == 0 {
            return Err(Error::config("concurrency.max_concurrent_jobs must be > 0"));
        }
        if self.workspace.root.as_os_str().is_empty() {
            return Err(Error::config("workspace.root is required"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.coordinator.poll_interval_ms)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig {
                id: None,
                provider_address: String::new(),
                gpu_name: None,
                gpu_specs: "cpu".into(),
                memory_mb: 4096,
            },
            coordinator: CoordinatorConfig {
                base_url: "http://localhost:3000".into(),
                request_timeout_ms: 10_000,
                poll_interval_ms: 10_000,
            },
            workspace: WorkspaceConfig {
                root: std::env::temp_dir().join("node-agent-jobs"),
            },
            fetch: FetchConfig {
                max_download_bytes: 1024 * 1024 * 1024, // 1GB
                retries: 1,
                retry_delay_ms: 1_000,
                content_gateway: None,
            },
            sandbox: SandboxSettings {
                memory_limit_bytes: 512 * 1024 * 1024, // 512MB
                cpu_quota: 100_000,                    // 1 CPU core
                pids_limit: 100,
                pull_missing_images: true,
                non_zero_exit: NonZeroExitPolicy::Report,
                max_log_bytes: 64 * 1024,
            },
            timeouts: StageTimeouts {
                claim_ms: 15_000,
                fetch_ms: 300_000,
                execute_ms: 900_000,
                hash_ms: 120_000,
                report_ms: 60_000,
            },
            report: ReportConfig {
                max_attempts: 5,
                initial_backoff_ms: 500,
                max_backoff_ms: 8_000,
            },
            concurrency: ConcurrencyConfig {
                max_concurrent_jobs: 2,
            },
            telemetry: TelemetryConfig {
                json_logs: false,
                metrics_listen: None,
            },
        }
    }
}
