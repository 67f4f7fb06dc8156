//! Heartbeat rounds against in-process providers standing in for the
//! coordinator (metrics, systemd) and cluster configuration.

use fabric_comm::{Address, CommConfig, Provider, Tracker, TrackerConfig, TransportConfig};
use serde_json::json;
use stats_pusher::tasks::BundleHeartbeatArgs;
use stats_pusher::{PusherConfig, PusherError, StatsPusher};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SERVICE: &str = "4b3a4f5c-0cd0-4f5e-9b37-2f2f5cf0e0a1";

struct Cluster {
    coordinator: Provider,
    clusterconf: Provider,
    heartbeats: Arc<Mutex<Vec<BundleHeartbeatArgs>>>,
}

/// `failing` bundles answer their heartbeat with a task error.
async fn start_cluster(failing: HashSet<u64>) -> (Cluster, Address, Address) {
    let coordinator = Provider::new(Address::tcp("127.0.0.1:0"), TransportConfig::default());
    coordinator
        .register_fn("metrics-host", |_| Ok(json!({"hostname": "node-serial-01", "os": "linux"})))
        .unwrap();
    coordinator
        .register_fn("systemd-list", |_| {
            Ok(json!({"units": [
                {"name": format!("1:{SERVICE}"), "activeState": "active"},
                {"name": format!("2:{SERVICE}"), "activeState": "active"},
                {"name": format!("3:{SERVICE}"), "activeState": "active"},
                {"name": format!("99:{SERVICE}"), "activeState": "active"},
                {"name": "sshd.service", "activeState": "active"},
            ]}))
        })
        .unwrap();
    let coordinator_url = coordinator.start().await.unwrap();

    let clusterconf = Provider::new(Address::tcp("127.0.0.1:0"), TransportConfig::default());
    clusterconf
        .register_fn("list-bundles", |_| {
            Ok(json!({"bundles": [{"id": 1}, {"id": 2}, {"id": 3}, {"id": 4}]}))
        })
        .unwrap();
    let heartbeats = Arc::new(Mutex::new(Vec::new()));
    let recorded = heartbeats.clone();
    clusterconf
        .register_fn("bundle-heartbeat", move |req| {
            let args: BundleHeartbeatArgs = req.decode_args()?;
            let id = args.id;
            recorded.lock().unwrap().push(args);
            if failing.contains(&id) {
                return Err(fabric_comm::TaskError::task("bundle not found").with_context("id", id));
            }
            Ok(json!(null))
        })
        .unwrap();
    let clusterconf_url = clusterconf.start().await.unwrap();

    (
        Cluster {
            coordinator,
            clusterconf,
            heartbeats,
        },
        coordinator_url,
        clusterconf_url,
    )
}

async fn start_pusher(coordinator: Address, heartbeat_url: Address) -> (StatsPusher, Arc<Tracker>) {
    let config = PusherConfig {
        comm: CommConfig {
            tracker: TrackerConfig {
                default_timeout: Duration::from_secs(2),
                ..TrackerConfig::new(Address::tcp("127.0.0.1:0"))
            },
            transport: TransportConfig::new(coordinator),
        },
        heartbeat_url,
        push_interval: Duration::from_secs(30),
        node_ip: Some("10.0.0.7".parse().unwrap()),
    };
    let tracker = Arc::new(Tracker::new(config.tracker_config()));
    tracker.start().await.unwrap();
    (StatsPusher::new(config, tracker.clone()), tracker)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_round_heartbeats_known_local_bundles() {
    let (cluster, coordinator_url, clusterconf_url) = start_cluster(HashSet::new()).await;
    let (pusher, tracker) = start_pusher(coordinator_url, clusterconf_url).await;

    pusher.bundle_heartbeats().await.unwrap();

    let mut sent = cluster.heartbeats.lock().unwrap().clone();
    sent.sort_by_key(|args| args.id);
    let ids: Vec<u64> = sent.iter().map(|args| args.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert!(sent.iter().all(|args| args.serial == "node-serial-01"));
    assert!(sent.iter().all(|args| args.ip.to_string() == "10.0.0.7"));
    assert_eq!(tracker.pending_count(), 0);

    tracker.stop().await;
    cluster.coordinator.stop().await;
    cluster.clusterconf.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_heartbeats_fold_into_one_error() {
    let (cluster, coordinator_url, clusterconf_url) = start_cluster(HashSet::from([2, 3])).await;
    let (pusher, tracker) = start_pusher(coordinator_url, clusterconf_url).await;

    match pusher.bundle_heartbeats().await {
        Err(PusherError::HeartbeatsFailed(ids)) => assert_eq!(ids, vec![2, 3]),
        other => panic!("expected folded heartbeat failure, got {other:?}"),
    }

    tracker.stop().await;
    cluster.coordinator.stop().await;
    cluster.clusterconf.stop().await;
}

#[tokio::test]
async fn test_missing_serial_provider_fails_round() {
    let unreachable = {
        let listener = fabric_comm::EnvelopeListener::bind(&Address::tcp("127.0.0.1:0")).await.unwrap();
        listener.local_address().clone()
    };
    let (pusher, tracker) = start_pusher(unreachable.clone(), unreachable).await;

    assert!(matches!(
        pusher.bundle_heartbeats().await,
        Err(PusherError::Comm(fabric_comm::CommError::TransportUnavailable { .. }))
    ));
    assert_eq!(tracker.pending_count(), 0);
    tracker.stop().await;
}
