//! Payloads of the provider tasks the pusher calls.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

pub const METRICS_HOST: &str = "metrics-host";
pub const SYSTEMD_LIST: &str = "systemd-list";
pub const LIST_BUNDLES: &str = "list-bundles";
pub const BUNDLE_HEARTBEAT: &str = "bundle-heartbeat";

/// Result of `metrics-host`. Only the hostname is used, as the node serial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostInfo {
    pub hostname: String,
}

/// One unit from `systemd-list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitStatus {
    pub name: String,
    #[serde(default, rename = "activeState")]
    pub active_state: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitList {
    #[serde(default)]
    pub units: Vec<UnitStatus>,
}

/// A bundle known to cluster configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    pub id: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BundleList {
    #[serde(default)]
    pub bundles: Vec<Bundle>,
}

/// Args of `bundle-heartbeat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleHeartbeatArgs {
    pub id: u64,
    pub serial: String,
    pub ip: IpAddr,
}
