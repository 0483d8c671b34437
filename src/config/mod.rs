//! Configuration module for the mon operator.

use crate::error::{Error, Result};
use crate::resilience::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Interval between two mon health checks.
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(45);

/// How long a mon may stay out of quorum before it is failed over.
pub const DEFAULT_MON_OUT_TIMEOUT: Duration = Duration::from_secs(600);

/// Default mon port.
pub const DEFAULT_MON_PORT: u16 = 6789;

/// Main configuration for the operator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// Cluster identity and placement.
    #[serde(default)]
    pub cluster: ClusterConfig,
    /// Mon health checking.
    #[serde(default)]
    pub health: HealthConfig,
    /// Rolling update policies.
    #[serde(default)]
    pub rollout: RolloutConfig,
    /// Ceph CLI settings.
    #[serde(default)]
    pub ceph: CephConfig,
    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl OperatorConfig {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::InvalidConfig {
            field: path.display().to_string(),
            reason: format!("Failed to read config file: {}", e),
        })?;

        let config: Self = serde_json::from_str(&content).map_err(|e| Error::InvalidConfig {
            field: path.display().to_string(),
            reason: format!("Failed to parse config: {}", e),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.cluster.name.trim().is_empty() {
            return Err(Error::InvalidConfig {
                field: "cluster.name".to_string(),
                reason: "Cluster name must not be empty".to_string(),
            });
        }

        if self.health.interval.is_zero() {
            return Err(Error::InvalidConfig {
                field: "health.interval".to_string(),
                reason: "Health check interval must be non-zero".to_string(),
            });
        }

        if self.rollout.poll.max_attempts == 0 {
            return Err(Error::InvalidConfig {
                field: "rollout.poll.max_attempts".to_string(),
                reason: "Rollout polling needs at least one attempt".to_string(),
            });
        }

        if self.cluster.mon_port == 0 {
            return Err(Error::InvalidConfig {
                field: "cluster.mon_port".to_string(),
                reason: "Mon port must be non-zero".to_string(),
            });
        }

        Ok(())
    }
}

/// Cluster identity and mon placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Namespace the cluster lives in.
    pub namespace: String,
    /// Storage cluster name; also names the custom resource.
    pub name: String,
    /// Mons bind to their node's address instead of a dedicated service.
    /// The cluster resource overrides this once it is observed.
    #[serde(default)]
    pub host_network: bool,
    /// Port every mon listens on.
    #[serde(default = "default_mon_port")]
    pub mon_port: u16,
    /// Container image for mon daemons the resource does not pin.
    #[serde(default = "default_mon_image")]
    pub mon_image: String,
    /// How long to wait for a new mon deployment to report ready.
    #[serde(default = "default_start_policy")]
    pub start_policy: RetryPolicy,
}

fn default_mon_port() -> u16 {
    DEFAULT_MON_PORT
}

fn default_mon_image() -> String {
    "ceph/ceph:v13".to_string()
}

fn default_start_policy() -> RetryPolicy {
    RetryPolicy::fixed(60, Duration::from_secs(5))
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            namespace: "rook-ceph".to_string(),
            name: "rook-ceph".to_string(),
            host_network: false,
            mon_port: default_mon_port(),
            mon_image: default_mon_image(),
            start_policy: default_start_policy(),
        }
    }
}

/// Mon health checking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Interval between health checks.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Time out of quorum before a mon is failed over.
    #[serde(with = "humantime_serde")]
    pub mon_out_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            mon_out_timeout: DEFAULT_MON_OUT_TIMEOUT,
        }
    }
}

/// Rolling update policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutConfig {
    /// Retries for the pre-stop verification.
    pub verify: RetryPolicy,
    /// Polling for the rollout to complete.
    pub poll: RetryPolicy,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            verify: RetryPolicy::with_retries(5, Duration::from_secs(60)),
            poll: RetryPolicy::fixed(30, Duration::from_secs(2)),
        }
    }
}

/// Ceph CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CephConfig {
    /// Path of the `ceph` binary.
    pub binary: PathBuf,
    /// Directory holding the generated connection config.
    pub config_dir: PathBuf,
    /// Timeout for a single ceph command.
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,
}

impl CephConfig {
    /// Path of the connection config for a cluster.
    pub fn conf_path(&self, cluster_name: &str) -> PathBuf {
        self.config_dir.join(format!("{}.config", cluster_name))
    }
}

impl Default for CephConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ceph"),
            config_dir: PathBuf::from("/var/lib/rook"),
            command_timeout: Duration::from_secs(15),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Metrics server port.
    pub metrics_port: u16,
    /// Liveness server port.
    pub health_port: u16,
    /// Log level.
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_port: 8080,
            health_port: 8081,
            log_level: "info".to_string(),
        }
    }
}

/// Serde helper for Duration using humantime format.
pub mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        } else if let Some(s_val) = s.strip_suffix('s') {
            s_val
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| e.to_string())
        } else if let Some(m) = s.strip_suffix('m') {
            m.parse::<u64>()
                .map(|v| Duration::from_secs(v * 60))
                .map_err(|e| e.to_string())
        } else {
            s.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        }
    }
}
