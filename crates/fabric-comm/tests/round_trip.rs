//! # Round-trip tests
//!
//! A tracker and a provider talking over real sockets:
//!
//! 1. Caller tracks a request and sends it to the provider
//! 2. Provider runs the task and answers on the response hook
//! 3. Tracker resolves the entry and fires exactly one handler
//!
//! Requests the provider never answers in time resolve as timeouts.

use async_trait::async_trait;
use fabric_comm::{
    Address, ErrorKind, Provider, Request, Response, Sender, TaskError, TaskHandler, Tracker,
    TrackerConfig, TransportConfig,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Echoes its args back after a fixed delay.
struct DelayedEcho(Duration);

#[async_trait]
impl TaskHandler for DelayedEcho {
    async fn run(&self, request: &Request) -> Result<Value, TaskError> {
        tokio::time::sleep(self.0).await;
        Ok(request.args().clone())
    }
}

/// Handlers run on the blocking pool, so they only record; the test body asserts.
#[derive(Default)]
struct Counts {
    success: AtomicUsize,
    errors: Mutex<Vec<Response>>,
}

fn counted_request(task: &str, target: Address, counts: &Arc<Counts>) -> Request {
    let on_success = counts.clone();
    let on_error = counts.clone();
    Request::builder(task)
        .target(target)
        .args(&json!({"x": 1}))
        .on_success(move |_, _| {
            on_success.success.fetch_add(1, Ordering::SeqCst);
        })
        .on_error(move |_, resp| {
            on_error.errors.lock().push(resp.clone());
        })
        .build()
        .unwrap()
}

async fn echo_then_timeout(tracker_listen: Address, provider_listen: Address) {
    let provider = Provider::new(provider_listen, TransportConfig::default());
    provider.register("echo", DelayedEcho(Duration::from_millis(200))).unwrap();
    provider.register("stall", DelayedEcho(Duration::from_secs(3))).unwrap();
    let provider_url = provider.start().await.unwrap();

    let tracker = Tracker::new(TrackerConfig::new(tracker_listen));
    tracker.start().await.unwrap();
    let sender = Sender::new(TransportConfig::new(provider_url.clone()));

    // A: answered after 200ms.
    let a_counts = Arc::new(Counts::default());
    let mut a = counted_request("echo", provider_url.clone(), &a_counts);
    let mut a_resolution = tracker.track_request(&mut a, Duration::from_secs(2)).unwrap();
    sender.send(&a).await.unwrap();

    // B: the provider takes longer than the timeout.
    let b_counts = Arc::new(Counts::default());
    let mut b = counted_request("stall", provider_url.clone(), &b_counts);
    let mut b_resolution = tracker.track_request(&mut b, Duration::from_secs(2)).unwrap();
    sender.send(&b).await.unwrap();

    let a_response = a_resolution.wait().await.unwrap();
    assert_eq!(a_response.result(), Some(&json!({"x": 1})));

    let b_response = b_resolution.wait().await.unwrap();
    assert_eq!(b_response.error().map(|e| e.kind), Some(ErrorKind::Timeout));
    assert!(!tracker.is_pending(&b.id()));

    // Let handlers drain and the late answer for B arrive and be dropped.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(a_counts.success.load(Ordering::SeqCst), 1);
    assert!(a_counts.errors.lock().is_empty());
    assert_eq!(b_counts.success.load(Ordering::SeqCst), 0);
    {
        let b_errors = b_counts.errors.lock();
        assert_eq!(b_errors.len(), 1);
        assert!(b_errors[0].is_timeout());
        assert_eq!(b_errors[0].id(), b.id());
    }
    assert_eq!(tracker.stats().total_unmatched.load(Ordering::Relaxed), 1);

    tracker.stop().await;
    provider.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_echo_and_timeout_over_tcp() {
    echo_then_timeout(Address::tcp("127.0.0.1:0"), Address::tcp("127.0.0.1:0")).await;
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_echo_and_timeout_over_unix_sockets() {
    let dir = tempfile::tempdir().unwrap();
    echo_then_timeout(
        Address::unix(dir.path().join("tracker.sock")),
        Address::unix(dir.path().join("provider.sock")),
    )
    .await;
}

#[tokio::test]
async fn test_send_to_stopped_provider_is_unavailable() {
    let provider = Provider::new(Address::tcp("127.0.0.1:0"), TransportConfig::default());
    let provider_url = provider.start().await.unwrap();
    provider.stop().await;

    let tracker = Tracker::new(TrackerConfig::new(Address::tcp("127.0.0.1:0")));
    tracker.start().await.unwrap();

    let mut req = Request::builder("echo").target(provider_url).build().unwrap();
    tracker.track_request(&mut req, Duration::from_secs(5)).unwrap();

    let result = Sender::new(TransportConfig::default()).send(&req).await;
    assert!(matches!(result, Err(fabric_comm::CommError::TransportUnavailable { .. })));
    assert!(tracker.remove_request(&req));
    assert_eq!(tracker.pending_count(), 0);

    tracker.stop().await;
}

#[tokio::test]
async fn test_fire_and_forget_request_runs_task() {
    let provider = Provider::new(Address::tcp("127.0.0.1:0"), TransportConfig::default());
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    provider
        .register_fn("notify", move |req| {
            let _ = tx.send(req.args().clone());
            Ok(Value::Null)
        })
        .unwrap();
    let provider_url = provider.start().await.unwrap();

    let req = Request::builder("notify")
        .args(&json!({"event": "started"}))
        .build()
        .unwrap();
    assert!(req.response_hook().is_none());
    Sender::new(TransportConfig::new(provider_url)).send(&req).await.unwrap();

    let args = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
    assert_eq!(args, Some(json!({"event": "started"})));
    provider.stop().await;
}
