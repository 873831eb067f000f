//! Configuration types for the static topic remapper.
//!
//! Configuration is loaded from YAML files and validated before use.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::mapping::DEFAULT_BLOCK_SEQ_SIZE;

/// Root configuration for the remapper.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RemapperConfig {
    /// Cluster layout: which brokers exist and where they listen.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Broker admin connection settings.
    #[serde(default)]
    pub admin: AdminConfig,

    /// Planning and artifact settings.
    #[serde(default)]
    pub remap: RemapConfig,

    /// Prometheus metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Static cluster layout.
///
/// ```yaml
/// cluster:
///   clusters:
///     DefaultCluster:
///       broker-a: "10.0.0.1:10911"
///       broker-b: "10.0.0.2:10911"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ClusterConfig {
    /// Cluster name to broker name to master address.
    #[serde(default)]
    pub clusters: BTreeMap<String, BTreeMap<String, String>>,
}

/// Broker admin connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdminConfig {
    /// Connection timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Per-broker request timeout in milliseconds, applied to every fetch
    /// and to every apply request.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Largest admin frame accepted from a broker, in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

/// Planning and artifact settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemapConfig {
    /// Directory for before/after artifacts. Defaults to the system temp dir.
    #[serde(default)]
    pub artifact_dir: Option<PathBuf>,

    /// Block size new logical offsets are rounded up to.
    #[serde(default = "default_block_seq_size")]
    pub block_seq_size: i64,
}

/// Prometheus metrics configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Whether to collect metrics at all.
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Write the text exposition here when the run ends, for a node
    /// exporter textfile collector.
    #[serde(default)]
    pub textfile: Option<PathBuf>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

// Default value functions

fn default_connect_timeout_ms() -> u64 {
    3_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_max_frame_size() -> usize {
    16 * 1024 * 1024
}

fn default_block_seq_size() -> i64 {
    DEFAULT_BLOCK_SEQ_SIZE
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

impl Default for RemapConfig {
    fn default() -> Self {
        Self {
            artifact_dir: None,
            block_seq_size: default_block_seq_size(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            textfile: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AdminConfig {
    /// Connection timeout as a [`Duration`].
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Request timeout as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl RemapConfig {
    /// Directory artifacts are written to.
    #[must_use]
    pub fn artifact_dir(&self) -> PathBuf {
        self.artifact_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Validate the remap configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `block_seq_size` is not positive.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.block_seq_size < 1 {
            return Err(ConfigError::InvalidBlockSeqSize(self.block_seq_size));
        }
        Ok(())
    }
}

// Configuration loading and validation

impl RemapperConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if
    /// validation fails.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or validation fails.
    pub fn from_str(content: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation check fails.
    pub fn validate(&self) -> ConfigResult<()> {
        self.cluster.validate()?;
        if self.admin.connect_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout {
                name: "connect_timeout_ms",
            });
        }
        if self.admin.request_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout {
                name: "request_timeout_ms",
            });
        }
        self.remap.validate()
    }
}

impl ClusterConfig {
    /// Validate broker addresses and names.
    ///
    /// # Errors
    ///
    /// Returns an error if an address is not `host:port` or a broker name
    /// appears in more than one cluster.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut seen: HashMap<&str, &str> = HashMap::new();

        for (cluster, brokers) in &self.clusters {
            for (broker, address) in brokers {
                parse_address(broker, address)?;
                if let Some(first) = seen.insert(broker.as_str(), cluster.as_str()) {
                    return Err(ConfigError::DuplicateBroker {
                        broker: broker.clone(),
                        first: first.to_string(),
                        second: cluster.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Split `host:port`, rejecting anything else.
fn parse_address(broker: &str, address: &str) -> ConfigResult<(String, u16)> {
    let invalid = || ConfigError::InvalidAddress {
        broker: broker.to_string(),
        address: address.to_string(),
    };
    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() {
        return Err(invalid());
    }
    let port: u16 = port.parse().map_err(|_| invalid())?;
    Ok((host.to_string(), port))
}
