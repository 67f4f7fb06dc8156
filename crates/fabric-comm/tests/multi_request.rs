//! MultiRequest against a live provider: partial answers, send failures.

use async_trait::async_trait;
use fabric_comm::{
    Address, MultiRequest, Provider, Request, Sender, TaskError, TaskHandler, Tracker,
    TrackerConfig, TransportConfig,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Sleep(Duration);

#[async_trait]
impl TaskHandler for Sleep {
    async fn run(&self, _request: &Request) -> Result<Value, TaskError> {
        tokio::time::sleep(self.0).await;
        Ok(json!("awake"))
    }
}

async fn start_provider() -> (Provider, Address) {
    let provider = Provider::new(Address::tcp("127.0.0.1:0"), TransportConfig::default());
    provider.register_fn("systemd-list", |_| Ok(json!({"units": []}))).unwrap();
    provider.register("hang", Sleep(Duration::from_secs(30))).unwrap();
    let url = provider.start().await.unwrap();
    (provider, url)
}

async fn start_tracker() -> Arc<Tracker> {
    let tracker = Arc::new(Tracker::new(
        TrackerConfig::new(Address::tcp("127.0.0.1:0")).with_reap_interval(Duration::from_millis(20)),
    ));
    tracker.start().await.unwrap();
    tracker
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_group_reports_every_member_by_deadline() {
    let (provider, url) = start_provider().await;
    let tracker = start_tracker().await;
    let sender = Sender::new(TransportConfig::new(url));

    let timeout = Duration::from_millis(500);
    let group = MultiRequest::new(tracker.clone(), timeout);
    for (name, task) in [("fast-1", "systemd-list"), ("fast-2", "systemd-list"), ("slow", "hang")] {
        let mut req = Request::new(task).unwrap();
        group.add_request(name, &mut req).unwrap();
        sender.send(&req).await.unwrap();
    }

    let started = Instant::now();
    let responses = group.responses().await;
    assert!(started.elapsed() < timeout + Duration::from_millis(300));

    assert_eq!(responses.len(), 3);
    assert_eq!(responses["fast-1"].result(), Some(&json!({"units": []})));
    assert_eq!(responses["fast-2"].result(), Some(&json!({"units": []})));
    assert!(responses["slow"].is_timeout());
    assert_eq!(tracker.pending_count(), 0);

    tracker.stop().await;
    provider.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_send_member_is_removed_and_not_awaited() {
    let (provider, url) = start_provider().await;
    let tracker = start_tracker().await;
    let sender = Sender::new(TransportConfig::new(url));

    let unreachable = {
        let listener = fabric_comm::EnvelopeListener::bind(&Address::tcp("127.0.0.1:0")).await.unwrap();
        listener.local_address().clone()
    };

    let group = MultiRequest::new(tracker.clone(), Duration::from_secs(10));
    let mut a = Request::new("systemd-list").unwrap();
    let mut b = Request::builder("systemd-list").target(unreachable).build().unwrap();

    group.add_request("a", &mut a).unwrap();
    sender.send(&a).await.unwrap();

    group.add_request("b", &mut b).unwrap();
    assert!(sender.send(&b).await.is_err());
    assert!(group.remove_request(&b));

    let started = Instant::now();
    let responses = group.responses().await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(responses.len(), 1);
    assert!(responses["a"].is_success());
    assert!(!responses.contains_key("b"));
    assert_eq!(tracker.stats().total_cancelled.load(std::sync::atomic::Ordering::Relaxed), 1);

    tracker.stop().await;
    provider.stop().await;
}
