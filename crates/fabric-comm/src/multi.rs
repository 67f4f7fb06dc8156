//! Fan-out/join over one [`Tracker`].
//!
//! ```ignore
//! let group = MultiRequest::new(tracker.clone(), Duration::from_secs(5));
//! for (name, mut req) in requests {
//!     group.add_request(&name, &mut req)?;
//!     if sender.send(&req).await.is_err() {
//!         group.remove_request(&req);
//!     }
//! }
//! let responses = group.responses().await;
//! ```
//!
//! The group never sends anything itself; callers pick each member's
//! destination and must call [`MultiRequest::remove_request`] when a send
//! fails, otherwise the member is only reported once the deadline passes.

use crate::domain::envelope::{Request, Response};
use crate::domain::error::{CommError, CommResult};
use crate::tracker::{Resolution, Tracker};
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// A named group of tracked requests joined by [`responses`](Self::responses).
///
/// The shared deadline starts when the group is created. Every member is
/// tracked with the group timeout, so no member outlives the group.
pub struct MultiRequest {
    tracker: Arc<Tracker>,
    timeout: Duration,
    deadline: Instant,
    members: Mutex<HashMap<String, Resolution>>,
}

impl MultiRequest {
    pub fn new(tracker: Arc<Tracker>, timeout: Duration) -> Self {
        Self {
            tracker,
            timeout,
            deadline: Instant::now() + timeout,
            members: Mutex::new(HashMap::new()),
        }
    }

    /// Track `request` under `name`.
    ///
    /// # Errors
    ///
    /// `DuplicateName` if `name` is already a member; otherwise whatever
    /// [`Tracker::track_request`] returns.
    pub fn add_request(&self, name: &str, request: &mut Request) -> CommResult<()> {
        let mut members = self.members.lock();
        if members.contains_key(name) {
            return Err(CommError::DuplicateName(name.to_string()));
        }

        let resolution = self.tracker.track_request(request, self.timeout)?;
        members.insert(name.to_string(), resolution);
        Ok(())
    }

    /// Cancel tracking of `request` and stop waiting on it. Returns whether
    /// it was a member of this group.
    pub fn remove_request(&self, request: &Request) -> bool {
        self.tracker.remove_request(request);

        let id = request.id();
        let mut members = self.members.lock();
        let before = members.len();
        members.retain(|_, resolution| resolution.id() != id);
        before != members.len()
    }

    pub fn len(&self) -> usize {
        self.members.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.lock().is_empty()
    }

    /// Wait until every member has resolved or the group deadline passes.
    ///
    /// Every member still in the group appears in the result. Members
    /// unresolved at the deadline are expired through the tracker and
    /// reported with its synthesized timeout response. Removed members are
    /// absent.
    pub async fn responses(self) -> HashMap<String, Response> {
        let members = std::mem::take(&mut *self.members.lock());
        let deadline = self.deadline;
        let tracker = &self.tracker;

        let waits = members.into_iter().map(|(name, mut resolution)| async move {
            let first = tokio::time::timeout_at(deadline, resolution.wait()).await;
            let outcome = match first {
                Ok(outcome) => outcome,
                Err(_) => {
                    if tracker.expire_request(&resolution.id()) {
                        debug!(member = %name, request_id = %resolution.id(), "Group deadline expired member");
                    }
                    resolution.wait().await
                }
            };
            (name, outcome)
        });

        let mut responses = HashMap::new();
        for (name, outcome) in join_all(waits).await {
            match outcome {
                Ok(response) => {
                    responses.insert(name, response);
                }
                Err(e) => warn!(member = %name, error = %e, "Member left the group unresolved"),
            }
        }
        responses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::address::Address;
    use crate::domain::config::TrackerConfig;
    use serde_json::json;

    async fn running_tracker() -> Arc<Tracker> {
        let tracker = Arc::new(Tracker::new(
            TrackerConfig::new(Address::tcp("127.0.0.1:0")).with_reap_interval(Duration::from_millis(10)),
        ));
        tracker.start().await.unwrap();
        tracker
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let tracker = running_tracker().await;
        let group = MultiRequest::new(tracker.clone(), Duration::from_secs(1));

        let mut first = Request::new("echo").unwrap();
        let mut second = Request::new("echo").unwrap();
        group.add_request("a", &mut first).unwrap();
        assert!(matches!(
            group.add_request("a", &mut second),
            Err(CommError::DuplicateName(name)) if name == "a"
        ));
        assert!(!tracker.is_pending(&second.id()));
        tracker.stop().await;
    }

    #[tokio::test]
    async fn test_tracker_errors_propagate() {
        let tracker = Arc::new(Tracker::new(TrackerConfig::new(Address::tcp("127.0.0.1:0"))));
        let group = MultiRequest::new(tracker, Duration::from_secs(1));
        let mut req = Request::new("echo").unwrap();
        assert!(matches!(group.add_request("a", &mut req), Err(CommError::NotRunning)));
        assert!(group.is_empty());
    }

    #[tokio::test]
    async fn test_partial_responses_fill_with_timeouts() {
        let tracker = running_tracker().await;
        let group = MultiRequest::new(tracker.clone(), Duration::from_millis(200));

        let mut ids = HashMap::new();
        for name in ["a", "b", "c", "d"] {
            let mut req = Request::new("echo").unwrap();
            group.add_request(name, &mut req).unwrap();
            ids.insert(name, req.id());
        }
        tracker.handle_response(Response::ok(ids["a"], json!(1)));
        tracker.handle_response(Response::ok(ids["c"], json!(3)));

        let started = Instant::now();
        let responses = group.responses().await;
        assert!(started.elapsed() < Duration::from_millis(500));

        assert_eq!(responses.len(), 4);
        assert_eq!(responses["a"].result(), Some(&json!(1)));
        assert_eq!(responses["c"].result(), Some(&json!(3)));
        assert!(responses["b"].is_timeout());
        assert!(responses["d"].is_timeout());
        assert_eq!(tracker.pending_count(), 0);
        tracker.stop().await;
    }

    #[tokio::test]
    async fn test_removed_member_is_absent() {
        let tracker = running_tracker().await;
        let group = MultiRequest::new(tracker.clone(), Duration::from_secs(10));

        let mut a = Request::new("echo").unwrap();
        let mut b = Request::new("echo").unwrap();
        group.add_request("a", &mut a).unwrap();
        group.add_request("b", &mut b).unwrap();

        assert!(group.remove_request(&b));
        assert!(!group.remove_request(&b));
        assert!(!tracker.is_pending(&b.id()));

        tracker.handle_response(Response::ok(a.id(), json!("done")));
        let started = Instant::now();
        let responses = group.responses().await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(responses.len(), 1);
        assert!(responses["a"].is_success());
        assert!(!responses.contains_key("b"));
        tracker.stop().await;
    }

    #[tokio::test]
    async fn test_empty_group_returns_immediately() {
        let tracker = running_tracker().await;
        let group = MultiRequest::new(tracker.clone(), Duration::from_secs(10));
        assert!(group.responses().await.is_empty());
        tracker.stop().await;
    }
}
