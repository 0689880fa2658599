// src/config.rs

//! Manages runtime configuration: loading, defaults, and validation.

use crate::core::handler::DispatchMode;
use crate::core::protocol::FramingKind;
use crate::core::protocol::frame::{
    DEFAULT_DELIMITER, DEFAULT_MAX_FRAME_LENGTH, MAX_LENGTH_PREFIXED_FRAME,
};
use crate::server::EventLoopKind;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// How raw bytes are cut into frames.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FramingConfig {
    #[serde(default)]
    pub kind: FramingKind,
    /// Terminator byte for `delimited` framing.
    #[serde(default = "default_delimiter")]
    pub delimiter: u8,
    #[serde(default = "default_max_frame_length")]
    pub max_frame_length: usize,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            kind: FramingKind::default(),
            delimiter: default_delimiter(),
            max_frame_length: default_max_frame_length(),
        }
    }
}

fn default_delimiter() -> u8 {
    DEFAULT_DELIMITER
}
fn default_max_frame_length() -> usize {
    DEFAULT_MAX_FRAME_LENGTH
}

/// Where pipeline runs execute.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    #[serde(default)]
    pub mode: DispatchMode,
    /// Size of the worker pool in `worker_pool` mode.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::default(),
            worker_threads: default_worker_threads(),
        }
    }
}

fn default_worker_threads() -> usize {
    4
}

/// Socket level settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IoConfig {
    /// Size of the scratch buffer for one read call.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// How often blocking readers and acceptors check for shutdown.
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: default_read_buffer_size(),
            poll_interval: default_poll_interval(),
        }
    }
}

fn default_read_buffer_size() -> usize {
    8 * 1024
}
fn default_poll_interval() -> Duration {
    Duration::from_millis(50)
}

/// Remote method invocation settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RmiConfig {
    /// Upper bound on one blocking remote call. `None` waits forever.
    #[serde(with = "humantime_serde", default = "default_call_timeout")]
    pub call_timeout: Option<Duration>,
}

impl Default for RmiConfig {
    fn default() -> Self {
        Self {
            call_timeout: default_call_timeout(),
        }
    }
}

fn default_call_timeout() -> Option<Duration> {
    Some(Duration::from_secs(30))
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Upper bound on waiting for a pipeline's access lock. `None` waits forever.
    #[serde(with = "humantime_serde", default)]
    pub acquire_timeout: Option<Duration>,
}

/// The complete runtime configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind or connect to. `0` binds an ephemeral port.
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub event_loop: EventLoopKind,
    #[serde(default)]
    pub framing: FramingConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub io: IoConfig,
    #[serde(default)]
    pub rmi: RmiConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// How long a client waits for the server to assign its id.
    #[serde(with = "humantime_serde", default = "default_handshake_timeout")]
    pub handshake_timeout: Duration,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    4444
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_handshake_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            event_loop: EventLoopKind::default(),
            framing: FramingConfig::default(),
            dispatcher: DispatcherConfig::default(),
            io: IoConfig::default(),
            rmi: RmiConfig::default(),
            pipeline: PipelineConfig::default(),
            handshake_timeout: default_handshake_timeout(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{}'", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Invalid config file '{}'", path.display()))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.framing.max_frame_length == 0 {
            return Err(anyhow!("framing.max_frame_length cannot be 0"));
        }
        if self.framing.kind == FramingKind::LengthPrefixed
            && self.framing.max_frame_length > MAX_LENGTH_PREFIXED_FRAME
        {
            return Err(anyhow!(
                "framing.max_frame_length cannot exceed {} with length-prefixed framing",
                MAX_LENGTH_PREFIXED_FRAME
            ));
        }
        if self.io.read_buffer_size == 0 {
            return Err(anyhow!("io.read_buffer_size cannot be 0"));
        }
        if self.io.poll_interval.is_zero() {
            return Err(anyhow!("io.poll_interval cannot be 0"));
        }
        if self.dispatcher.mode == DispatchMode::WorkerPool && self.dispatcher.worker_threads == 0
        {
            return Err(anyhow!(
                "dispatcher.worker_threads cannot be 0 in worker_pool mode"
            ));
        }
        if self.handshake_timeout.is_zero() {
            return Err(anyhow!("handshake_timeout cannot be 0"));
        }
        if self.rmi.call_timeout.is_none() {
            warn!("rmi.call_timeout is unset; remote calls may block forever.");
        }
        Ok(())
    }
}
