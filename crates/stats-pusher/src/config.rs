//! Stats pusher configuration.
//!
//! Fabric plumbing comes from the `FABRIC_*` variables read by
//! [`CommConfig::from_env_or`] on top of the pusher's own defaults (the
//! tracker listens on `unix:///var/run/fabric/stats-pusher.sock`). The
//! pusher adds:
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `STATS_PUSHER_HEARTBEAT_URL` | `unix:///var/run/fabric/clusterconf.sock` | Provider of `list-bundles` and `bundle-heartbeat` |
//! | `STATS_PUSHER_PUSH_INTERVAL_MS` | `30000` | Time between heartbeat rounds |
//! | `STATS_PUSHER_NODE_IP` | unset | IP reported in bundle heartbeats (required) |

use crate::error::PusherError;
use fabric_comm::{Address, CommConfig, TrackerConfig, TransportConfig};
use std::env;
use std::net::IpAddr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PusherConfig {
    /// Tracker and transport settings. `comm.tracker.default_timeout` bounds
    /// every task request.
    pub comm: CommConfig,
    pub heartbeat_url: Address,
    pub push_interval: Duration,
    pub node_ip: Option<IpAddr>,
}

impl Default for PusherConfig {
    fn default() -> Self {
        Self {
            comm: CommConfig {
                tracker: TrackerConfig::new(Address::unix("/var/run/fabric/stats-pusher.sock")),
                transport: TransportConfig::default(),
            },
            heartbeat_url: Address::unix("/var/run/fabric/clusterconf.sock"),
            push_interval: Duration::from_secs(30),
            node_ip: None,
        }
    }
}

impl PusherConfig {
    /// Load from `FABRIC_*` and `STATS_PUSHER_*` variables and validate.
    pub fn from_env() -> Result<Self, PusherError> {
        let defaults = Self::default();

        let config = Self {
            comm: CommConfig::from_env_or(defaults.comm)
                .map_err(|e| PusherError::Config(e.to_string()))?,
            heartbeat_url: address_var("STATS_PUSHER_HEARTBEAT_URL", defaults.heartbeat_url)?,
            push_interval: millis_var("STATS_PUSHER_PUSH_INTERVAL_MS", defaults.push_interval)?,
            node_ip: match env::var("STATS_PUSHER_NODE_IP") {
                Ok(v) => Some(v.parse::<IpAddr>().map_err(|e| {
                    PusherError::Config(format!("STATS_PUSHER_NODE_IP={v:?}: {e}"))
                })?),
                Err(_) => None,
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PusherError> {
        self.comm
            .validate()
            .map_err(|e| PusherError::Config(e.to_string()))?;
        if self.push_interval.is_zero() {
            return Err(PusherError::Config("push_interval cannot be 0".into()));
        }
        if self.node_ip.is_none() {
            return Err(PusherError::Config("STATS_PUSHER_NODE_IP must be set".into()));
        }
        Ok(())
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        self.comm.tracker.clone()
    }

    pub fn transport_config(&self) -> TransportConfig {
        self.comm.transport.clone()
    }
}

fn address_var(var: &str, default: Address) -> Result<Address, PusherError> {
    match env::var(var) {
        Ok(value) => value
            .parse::<Address>()
            .map_err(|e| PusherError::Config(format!("{var}={value:?}: {e}"))),
        Err(_) => Ok(default),
    }
}

fn millis_var(var: &str, default: Duration) -> Result<Duration, PusherError> {
    match env::var(var) {
        Ok(value) => value
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| PusherError::Config(format!("{var}={value:?}: {e}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_requires_node_ip() {
        let config = PusherConfig::default();
        assert!(matches!(config.validate(), Err(PusherError::Config(_))));

        let config = PusherConfig {
            node_ip: Some("10.0.0.7".parse().unwrap()),
            ..PusherConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_durations_rejected() {
        let config = PusherConfig {
            node_ip: Some("10.0.0.7".parse().unwrap()),
            push_interval: Duration::ZERO,
            ..PusherConfig::default()
        };
        assert!(config.validate().is_err());

        let mut config = PusherConfig {
            node_ip: Some("10.0.0.7".parse().unwrap()),
            ..PusherConfig::default()
        };
        config.comm.tracker.default_timeout = Duration::ZERO;
        assert!(matches!(config.validate(), Err(PusherError::Config(msg)) if msg.contains("default_timeout")));
    }

    #[test]
    fn test_tracker_listens_on_pusher_socket() {
        let config = PusherConfig::default();
        let tracker = config.tracker_config();
        assert_eq!(tracker.listen, Address::unix("/var/run/fabric/stats-pusher.sock"));
        assert_eq!(tracker.default_timeout, Duration::from_secs(10));
        assert_eq!(config.transport_config().coordinator, TransportConfig::default().coordinator);
    }
}
