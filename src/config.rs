//! Server configuration parsing and validation.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::agent::response::ExecutionMode;
use crate::listeners::version_check::RuntimeVersion;
use crate::{AppError, Result};

/// Protocol version spoken by the agent script shipped with this server.
pub const DEFAULT_PROTOCOL_VERSION: u32 = 2;

/// Default maximum inbound frame length: 8 MiB.
///
/// Variable snapshots of large suites routinely exceed a megabyte.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_accept_timeout_ms() -> u64 {
    30_000
}

fn default_protocol_version() -> u32 {
    DEFAULT_PROTOCOL_VERSION
}

fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}

fn default_async_workers() -> usize {
    2
}

/// Test start behaviour negotiated during the agent handshake.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StartConfig {
    /// Execution mode announced to the agent.
    #[serde(default)]
    pub mode: ExecutionMode,
    /// How long the agent may be held before the start gate gives up;
    /// 0 means wait until start is allowed.
    #[serde(default)]
    pub timeout_ms: u64,
}

impl Default for StartConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Run,
            timeout_ms: 0,
        }
    }
}

/// Configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    /// Interface the server binds to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on; 0 picks an ephemeral port.
    #[serde(default)]
    pub port: u16,
    /// How long to wait for the agent to connect; 0 waits indefinitely.
    #[serde(default = "default_accept_timeout_ms")]
    pub accept_timeout_ms: u64,
    /// Protocol version the agent must report.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u32,
    /// Oldest runtime version accepted, e.g. `"3.0"`. Unset accepts any.
    #[serde(default)]
    pub min_runtime_version: Option<String>,
    /// Longest inbound frame accepted.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Size of the per-client pool computing asynchronous replies.
    #[serde(default = "default_async_workers")]
    pub async_workers: usize,
    /// Start gate settings.
    #[serde(default)]
    pub start: StartConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: 0,
            accept_timeout_ms: default_accept_timeout_ms(),
            protocol_version: default_protocol_version(),
            min_runtime_version: None,
            max_frame_bytes: default_max_frame_bytes(),
            async_workers: default_async_workers(),
            start: StartConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Accept timeout; `None` when the server waits for the agent
    /// indefinitely.
    #[must_use]
    pub fn accept_timeout(&self) -> Option<Duration> {
        (self.accept_timeout_ms > 0).then(|| Duration::from_millis(self.accept_timeout_ms))
    }

    /// Start gate timeout; `None` when the gate waits indefinitely.
    #[must_use]
    pub fn start_timeout(&self) -> Option<Duration> {
        (self.start.timeout_ms > 0).then(|| Duration::from_millis(self.start.timeout_ms))
    }

    /// Parsed minimum runtime version, if one is configured.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the configured value is not a version.
    pub fn min_runtime_version(&self) -> Result<Option<RuntimeVersion>> {
        self.min_runtime_version
            .as_deref()
            .map(|raw| {
                RuntimeVersion::parse(raw).ok_or_else(|| {
                    AppError::Config(format!("min_runtime_version '{raw}' is not a version"))
                })
            })
            .transpose()
    }

    /// Check value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(AppError::Config("host must not be empty".into()));
        }

        if self.async_workers == 0 {
            return Err(AppError::Config(
                "async_workers must be greater than zero".into(),
            ));
        }

        if self.max_frame_bytes < 1024 {
            return Err(AppError::Config(
                "max_frame_bytes must be at least 1024".into(),
            ));
        }

        self.min_runtime_version()?;
        Ok(())
    }
}
