//! Proxy server configuration settings

use crate::filter::BlockList;
use crate::utils::optional_secs;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Hosts refused when no configuration overrides the list
pub const DEFAULT_BLOCKED_HOSTS: &[&str] = &["www.twitch.tv", "www.youtube.com"];

/// Main configuration for the proxy server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Server listening address
    pub listen_addr: SocketAddr,

    /// Log level configuration
    pub log_level: String,

    /// Hostnames answered with the 403 page instead of being proxied
    pub blocked_hosts: Vec<String>,

    /// Outbound connection configuration
    pub upstream: UpstreamConfig,

    /// CONNECT tunnel and byte relay configuration
    pub tunnel: TunnelConfig,

    /// Request head size limits
    pub limits: LimitsConfig,

    /// Runtime configuration
    pub runtime: RuntimeConfig,
}

/// Outbound connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Connection timeout in seconds (0 = wait for the OS)
    pub connect_timeout_secs: u64,

    /// Answer `502 Bad Gateway` when the destination is unreachable
    /// instead of closing the client connection silently
    pub respond_on_failure: bool,
}

/// CONNECT tunnel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Close a relay direction after this many seconds without data (0 = never)
    pub idle_timeout_secs: u64,

    /// Bytes copied per read
    pub chunk_size: usize,
}

/// Request head size limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Longest accepted request line, terminator included
    pub max_request_line_bytes: usize,

    /// Largest accepted header block following the request line
    pub max_header_bytes: usize,
}

/// Runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Runtime mode: "single_threaded" or "multi_threaded"
    pub mode: String,

    /// Number of worker threads for multi-threaded mode (None = auto-detect CPU cores)
    pub worker_threads: Option<usize>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_level: "info".to_string(),
            blocked_hosts: DEFAULT_BLOCKED_HOSTS.iter().map(|h| h.to_string()).collect(),
            upstream: UpstreamConfig::default(),
            tunnel: TunnelConfig::default(),
            limits: LimitsConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            respond_on_failure: true,
        }
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 300,
            chunk_size: 4096,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_request_line_bytes: 8192,
            max_header_bytes: 64 * 1024,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mode: "multi_threaded".to_string(),
            worker_threads: None,
        }
    }
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        optional_secs(self.connect_timeout_secs)
    }
}

impl TunnelConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        optional_secs(self.idle_timeout_secs)
    }
}

impl ProxyConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: ProxyConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Load configuration from an optional YAML file with environment variable overrides.
    ///
    /// An explicitly given path must exist. Without one, `config.yml` in the
    /// working directory is used when present and defaults otherwise.
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None if Path::new("config.yml").exists() => Self::from_yaml_file("config.yml")?,
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Override settings from environment variables
    pub fn apply_env_overrides(&mut self) {
        if let Ok(addr_str) = std::env::var("PROXY_LISTEN_ADDR") {
            if let Ok(addr) = addr_str.parse() {
                self.listen_addr = addr;
            }
        }

        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.log_level = log_level;
        }

        if let Ok(hosts) = std::env::var("PROXY_BLOCKED_HOSTS") {
            self.blocked_hosts = hosts
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Ok(timeout) = std::env::var("PROXY_CONNECT_TIMEOUT_SECS") {
            if let Ok(timeout) = timeout.parse() {
                self.upstream.connect_timeout_secs = timeout;
            }
        }

        if let Ok(timeout) = std::env::var("PROXY_TUNNEL_IDLE_TIMEOUT_SECS") {
            if let Ok(timeout) = timeout.parse() {
                self.tunnel.idle_timeout_secs = timeout;
            }
        }

        if let Ok(mode) = std::env::var("PROXY_RUNTIME_MODE") {
            self.runtime.mode = mode;
        }

        if let Ok(threads) = std::env::var("PROXY_WORKER_THREADS") {
            if let Ok(threads) = threads.parse() {
                self.runtime.worker_threads = Some(threads);
            }
        }
    }

    /// Reject settings the proxy cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.tunnel.chunk_size == 0 {
            bail!("tunnel.chunk_size must be greater than zero");
        }
        if self.limits.max_request_line_bytes == 0 || self.limits.max_header_bytes == 0 {
            bail!("limits must be greater than zero");
        }
        if !matches!(self.runtime.mode.as_str(), "single_threaded" | "multi_threaded") {
            bail!("unknown runtime mode '{}'", self.runtime.mode);
        }
        if let Some(host) = self.blocked_hosts.iter().find(|h| h.trim().is_empty()) {
            bail!("blocked_hosts contains an empty entry: {:?}", host);
        }
        Ok(())
    }

    /// Build the immutable block list handed to the dispatcher
    pub fn block_list(&self) -> BlockList {
        BlockList::new(self.blocked_hosts.iter())
    }
}
