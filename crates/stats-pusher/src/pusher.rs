//! Bundle heartbeat round.
//!
//! 1. `metrics-host` (single request, blocking wait) gives the node serial
//! 2. `systemd-list` and `list-bundles` run as one group; bundles that are
//!    both known to cluster configuration and running here are kept
//! 3. One `bundle-heartbeat` per kept bundle runs as a second group; any
//!    member that fails to send or answers with an error fails the round

use crate::config::PusherConfig;
use crate::error::PusherError;
use crate::tasks::{
    Bundle, BundleHeartbeatArgs, BundleList, HostInfo, UnitList, UnitStatus, BUNDLE_HEARTBEAT,
    LIST_BUNDLES, METRICS_HOST, SYSTEMD_LIST,
};
use fabric_comm::{MultiRequest, Request, Response, Sender, Tracker};
use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct StatsPusher {
    config: PusherConfig,
    tracker: Arc<Tracker>,
    sender: Sender,
}

impl StatsPusher {
    /// `tracker` must already be started. Its default timeout bounds every
    /// request of a round.
    pub fn new(config: PusherConfig, tracker: Arc<Tracker>) -> Self {
        let sender = Sender::new(config.transport_config());
        Self {
            config,
            tracker,
            sender,
        }
    }

    /// Run one heartbeat round.
    pub async fn bundle_heartbeats(&self) -> Result<(), PusherError> {
        let serial = self.get_serial().await?;
        let ip = self.get_ip()?;
        let bundles = self.get_bundles().await?;
        let healthy = self.run_health_checks(&bundles);
        self.send_bundle_heartbeats(&healthy, &serial, ip).await
    }

    async fn get_serial(&self) -> Result<String, PusherError> {
        let mut req = Request::new(METRICS_HOST)?;
        let mut resolution = self.tracker.track_request(&mut req, self.tracker.default_timeout())?;
        if let Err(e) = self.sender.send(&req).await {
            self.tracker.remove_request(&req);
            return Err(e.into());
        }

        let host: HostInfo = resolution.wait().await?.decode_result()?;
        Ok(host.hostname)
    }

    fn get_ip(&self) -> Result<IpAddr, PusherError> {
        self.config
            .node_ip
            .ok_or_else(|| PusherError::Config("node IP is not configured".into()))
    }

    async fn get_bundles(&self) -> Result<Vec<Bundle>, PusherError> {
        let requests = [
            ("local", Request::new(SYSTEMD_LIST)?),
            (
                "known",
                Request::builder(LIST_BUNDLES)
                    .target(self.config.heartbeat_url.clone())
                    .build()?,
            ),
        ];

        let group = MultiRequest::new(self.tracker.clone(), self.tracker.default_timeout());
        for (name, mut req) in requests {
            group.add_request(name, &mut req)?;
            if let Err(e) = self.sender.send(&req).await {
                warn!(member = name, task = req.task(), error = %e, "Failed to send bundle query");
                group.remove_request(&req);
                break;
            }
        }
        let responses = group.responses().await;

        let local: UnitList = member(&responses, "local")?.decode_result()?;
        let known: BundleList = member(&responses, "known")?.decode_result()?;

        let bundles: Vec<Bundle> = extract_bundles(&local.units)
            .into_iter()
            .filter_map(|id| known.bundles.iter().find(|b| b.id == id).cloned())
            .collect();
        debug!(
            running = local.units.len(),
            known = known.bundles.len(),
            matched = bundles.len(),
            "Resolved local bundles"
        );
        Ok(bundles)
    }

    // TODO: run each bundle's configured health checks through the health
    // provider once bundles carry them; every matched bundle passes for now.
    fn run_health_checks(&self, bundles: &[Bundle]) -> Vec<u64> {
        bundles.iter().map(|b| b.id).collect()
    }

    async fn send_bundle_heartbeats(
        &self,
        bundles: &[u64],
        serial: &str,
        ip: IpAddr,
    ) -> Result<(), PusherError> {
        let mut errored = Vec::new();

        let group = MultiRequest::new(self.tracker.clone(), self.tracker.default_timeout());
        for &id in bundles {
            let args = BundleHeartbeatArgs {
                id,
                serial: serial.to_string(),
                ip,
            };
            let built = Request::builder(BUNDLE_HEARTBEAT)
                .target(self.config.heartbeat_url.clone())
                .args(&args)
                .build();
            let mut req = match built {
                Ok(req) => req,
                Err(e) => {
                    warn!(bundle = id, error = %e, "Failed to build heartbeat");
                    errored.push(id);
                    continue;
                }
            };
            if let Err(e) = group.add_request(&id.to_string(), &mut req) {
                warn!(bundle = id, error = %e, "Failed to track heartbeat");
                errored.push(id);
                continue;
            }
            if let Err(e) = self.sender.send(&req).await {
                warn!(bundle = id, error = %e, "Failed to send heartbeat");
                group.remove_request(&req);
                errored.push(id);
            }
        }

        for (name, response) in group.responses().await {
            if let Some(error) = response.error() {
                warn!(bundle = %name, error = %error, "Bundle heartbeat unsuccessful");
                if let Ok(id) = name.parse() {
                    errored.push(id);
                }
            }
        }

        if errored.is_empty() {
            info!(bundles = bundles.len(), serial, "Bundle heartbeats sent");
            return Ok(());
        }
        errored.sort_unstable();
        errored.dedup();
        Err(PusherError::HeartbeatsFailed(errored))
    }
}

fn member<'a>(responses: &'a HashMap<String, Response>, name: &str) -> Result<&'a Response, PusherError> {
    responses
        .get(name)
        .ok_or_else(|| PusherError::MissingResponse(name.to_string()))
}

/// Bundle IDs of units named `bundleID:serviceUUID`, deduplicated and sorted.
///
/// The bundle ID must be all decimal digits and the service UUID in the
/// 36-character hyphenated form; anything else is not a bundle unit.
pub fn extract_bundles(units: &[UnitStatus]) -> Vec<u64> {
    let ids: BTreeSet<u64> = units
        .iter()
        .filter_map(|unit| {
            let (bundle, service) = unit.name.split_once(':')?;
            if !is_hyphenated_uuid(service) {
                return None;
            }
            if bundle.is_empty() || !bundle.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            bundle.parse().ok()
        })
        .collect();
    ids.into_iter().collect()
}

// `Uuid::parse_str` also takes the simple, braced and urn forms; only the
// hyphenated one is 36 characters long.
fn is_hyphenated_uuid(s: &str) -> bool {
    s.len() == 36 && Uuid::parse_str(s).is_ok()
}
