//! Fabric configuration with validation.
//!
//! # Environment Variables
//!
//! Read by [`CommConfig::from_env_or`]. Defaults are the caller's.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `FABRIC_COORDINATOR_URL` | `unix:///var/run/fabric/coordinator.sock` | Default destination for requests without a task URL |
//! | `FABRIC_TRACKER_URL` | `unix:///var/run/fabric/tracker.sock` | Address the tracker listens on for responses |
//! | `FABRIC_REQUEST_TIMEOUT_MS` | `10000` | Default request timeout |
//! | `FABRIC_REAP_INTERVAL_MS` | `100` | How often expired requests are swept |
//! | `FABRIC_WRITE_TIMEOUT_MS` | `5000` | Limit for one envelope write plus its ack |

use crate::domain::address::Address;
use std::env;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_COORDINATOR_SOCKET: &str = "/var/run/fabric/coordinator.sock";
const DEFAULT_TRACKER_SOCKET: &str = "/var/run/fabric/tracker.sock";

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    #[error("invalid address in {var}: {reason}")]
    InvalidAddress { var: String, reason: String },
}

/// Top-level fabric configuration.
#[derive(Debug, Clone, Default)]
pub struct CommConfig {
    pub tracker: TrackerConfig,
    pub transport: TransportConfig,
}

impl CommConfig {
    /// Overlay the `FABRIC_*` variables on `defaults`. Malformed addresses
    /// are errors; malformed numbers fall back.
    pub fn from_env_or(defaults: Self) -> Result<Self, ConfigError> {
        let config = Self {
            tracker: TrackerConfig {
                listen: address_from_env("FABRIC_TRACKER_URL", defaults.tracker.listen)?,
                default_timeout: millis_from_env(
                    "FABRIC_REQUEST_TIMEOUT_MS",
                    defaults.tracker.default_timeout,
                ),
                reap_interval: millis_from_env(
                    "FABRIC_REAP_INTERVAL_MS",
                    defaults.tracker.reap_interval,
                ),
            },
            transport: TransportConfig {
                coordinator: address_from_env(
                    "FABRIC_COORDINATOR_URL",
                    defaults.transport.coordinator,
                )?,
                write_timeout: millis_from_env(
                    "FABRIC_WRITE_TIMEOUT_MS",
                    defaults.transport.write_timeout,
                ),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tracker.validate()?;
        self.transport.validate()
    }
}

/// Tracker configuration.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Address the response listener binds.
    pub listen: Address,
    /// Timeout used by callers that have no request-specific one.
    pub default_timeout: Duration,
    /// Reaper sweep interval. Bounds how late a timeout can fire.
    pub reap_interval: Duration,
}

impl TrackerConfig {
    pub fn new(listen: Address) -> Self {
        Self {
            listen,
            ..Self::default()
        }
    }

    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "default_timeout cannot be 0".into(),
            ));
        }
        if self.reap_interval.is_zero() {
            return Err(ConfigError::InvalidTimeout("reap_interval cannot be 0".into()));
        }
        Ok(())
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            listen: Address::unix(DEFAULT_TRACKER_SOCKET),
            default_timeout: Duration::from_secs(10),
            reap_interval: Duration::from_millis(100),
        }
    }
}

/// Send-side configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Destination for requests that carry no task URL.
    pub coordinator: Address,
    /// Limit for writing one envelope and reading its acknowledgement.
    pub write_timeout: Duration,
}

impl TransportConfig {
    pub fn new(coordinator: Address) -> Self {
        Self {
            coordinator,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.write_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "write_timeout cannot be 0".into(),
            ));
        }
        Ok(())
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            coordinator: Address::unix(DEFAULT_COORDINATOR_SOCKET),
            write_timeout: Duration::from_secs(5),
        }
    }
}

fn address_from_env(var: &str, default: Address) -> Result<Address, ConfigError> {
    match env::var(var) {
        Ok(value) => value.parse().map_err(|e: crate::CommError| ConfigError::InvalidAddress {
            var: var.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn millis_from_env(var: &str, default: Duration) -> Duration {
    env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}
