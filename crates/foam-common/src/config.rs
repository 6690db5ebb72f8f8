//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Layered TOML configuration for store, transport, resolver and logging."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

/// Hosts the bridge is allowed to supervise a store on.
pub const LOCAL_HOSTS: [&str; 2] = ["localhost", "127.0.0.1"];

const MIB: u64 = 1024 * 1024;

fn default_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_port() -> u16 {
    6379
}

fn default_password() -> Option<String> {
    Some("sls2.0".to_owned())
}

fn default_executable() -> PathBuf {
    PathBuf::from("thirdparty/bin/redis-server")
}

fn default_max_memory_fraction() -> f64 {
    0.2
}

fn default_pubsub_soft_limit() -> u64 {
    128 * MIB
}

fn default_pubsub_hard_limit() -> u64 {
    4 * default_pubsub_soft_limit()
}

fn default_pubsub_soft_seconds() -> u64 {
    60
}

fn default_launch_probe_attempts() -> u32 {
    5
}

fn default_launch_probe_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_ping_attempts() -> u32 {
    3
}

fn default_ping_interval() -> Duration {
    Duration::from_millis(5000)
}

fn default_socket_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_stream_maxlen() -> usize {
    1000
}

fn default_endpoint() -> String {
    "tcp://localhost:45454".to_owned()
}

fn default_transport_timeout() -> Duration {
    Duration::from_millis(100)
}

fn default_retry_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("logs")
}

/// Primary configuration object for a bridge process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FoamConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where a [`FoamConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedFoamConfig {
    pub config: FoamConfig,
    /// `None` when no file was found and built-in defaults are in effect.
    pub source: Option<PathBuf>,
}

impl FoamConfig {
    pub const ENV_CONFIG_PATH: &str = "FOAMCORE_CONFIG";

    /// Load configuration from the first existing candidate, respecting the
    /// `FOAMCORE_CONFIG` override. Falls back to defaults when nothing exists.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedFoamConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedFoamConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedFoamConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        debug!("no configuration file found; using built-in defaults");
        Ok(LoadedFoamConfig {
            config: FoamConfig::default(),
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<FoamConfig>()
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.store.validate()?;
        if self.transport.timeout.is_zero() {
            return Err(anyhow!("transport timeout must be positive"));
        }
        Ok(())
    }
}

impl std::str::FromStr for FoamConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: FoamConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Connection, launch and capacity settings of the supervised store.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_password")]
    pub password: Option<String>,
    /// Socket-file connections are rejected by [`StoreConfig::validate`].
    #[serde(default)]
    pub unix_socket: Option<PathBuf>,
    #[serde(default = "default_executable")]
    pub executable: PathBuf,
    /// Share of total system memory the store may use.
    #[serde(default = "default_max_memory_fraction")]
    pub max_memory_fraction: f64,
    #[serde(default = "default_pubsub_soft_limit")]
    pub pubsub_soft_limit: u64,
    #[serde(default = "default_pubsub_hard_limit")]
    pub pubsub_hard_limit: u64,
    #[serde(default = "default_pubsub_soft_seconds")]
    pub pubsub_soft_seconds: u64,
    #[serde(default = "default_launch_probe_attempts")]
    pub launch_probe_attempts: u32,
    #[serde(default = "default_launch_probe_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub launch_probe_interval: Duration,
    #[serde(default = "default_ping_attempts")]
    pub ping_attempts: u32,
    #[serde(default = "default_ping_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub ping_interval: Duration,
    /// Connect/read/write timeout of every store session.
    #[serde(default = "default_socket_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub socket_timeout: Duration,
    /// Approximate MAXLEN applied to every published stream.
    #[serde(default = "default_stream_maxlen")]
    pub stream_maxlen: usize,
}

impl StoreConfig {
    /// Margin waited after asking a foreign store to shut down.
    pub fn shutdown_margin(&self) -> Duration {
        self.ping_interval * self.ping_attempts * 2
    }

    /// Whether `host` names this machine.
    pub fn is_local(&self) -> bool {
        LOCAL_HOSTS.contains(&self.host.as_str())
    }

    pub fn validate(&self) -> Result<()> {
        if self.unix_socket.is_some() {
            return Err(anyhow!("unix domain socket connection is not supported"));
        }
        if !self.is_local() {
            return Err(anyhow!(
                "connecting to remote store '{}' is not supported",
                self.host
            ));
        }
        if self.pubsub_hard_limit < self.pubsub_soft_limit {
            return Err(anyhow!(
                "pubsub hard limit ({}) must not be below the soft limit ({})",
                self.pubsub_hard_limit,
                self.pubsub_soft_limit
            ));
        }
        if self.launch_probe_attempts == 0 {
            return Err(anyhow!("launch_probe_attempts must be at least 1"));
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            password: default_password(),
            unix_socket: None,
            executable: default_executable(),
            max_memory_fraction: default_max_memory_fraction(),
            pubsub_soft_limit: default_pubsub_soft_limit(),
            pubsub_hard_limit: default_pubsub_hard_limit(),
            pubsub_soft_seconds: default_pubsub_soft_seconds(),
            launch_probe_attempts: default_launch_probe_attempts(),
            launch_probe_interval: default_launch_probe_interval(),
            ping_attempts: default_ping_attempts(),
            ping_interval: default_ping_interval(),
            socket_timeout: default_socket_timeout(),
            stream_maxlen: default_stream_maxlen(),
        }
    }
}

/// Socket pattern used to attach to the acquisition transport.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default, clap::ValueEnum,
)]
#[serde(rename_all = "UPPERCASE")]
#[value(rename_all = "UPPERCASE")]
pub enum SocketMode {
    Req,
    Pull,
    #[default]
    Sub,
}

impl fmt::Display for SocketMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SocketMode::Req => "REQ",
            SocketMode::Pull => "PULL",
            SocketMode::Sub => "SUB",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for SocketMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "REQ" => Ok(SocketMode::Req),
            "PULL" => Ok(SocketMode::Pull),
            "SUB" => Ok(SocketMode::Sub),
            other => Err(format!("unknown socket type: {other}")),
        }
    }
}

/// Wire format of the records arriving on the transport.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum DeserializerKind {
    /// Avro object container, writer schema embedded in every message.
    #[default]
    Avro,
    Json,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub socket: SocketMode,
    #[serde(default)]
    pub deserializer: DeserializerKind,
    #[serde(default = "default_transport_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            socket: SocketMode::default(),
            deserializer: DeserializerKind::default(),
            timeout: default_transport_timeout(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    #[serde(default = "default_retry_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub retry_interval: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            retry_interval: default_retry_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default)]
    pub format: LogFormat,
    /// Also write a daily rolling JSON file under `directory`.
    #[serde(default)]
    pub file: bool,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: LogFormat::default(),
            file: false,
            file_prefix: None,
        }
    }
}
