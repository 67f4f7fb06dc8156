//! Pending request registry.
//!
//! Removal from the map is the single arbitration point between the
//! listener, the reaper, `remove_request` and `stop`: whichever path removes
//! an entry owns its resolution, every later path finds nothing and is a
//! no-op. Resolution (settling the waiter, running callbacks) happens after
//! removal, outside any shard lock, so handlers may re-enter the tracker.

use crate::domain::correlation::RequestId;
use crate::domain::envelope::{Request, Response};
use crate::domain::error::{CommError, CommResult, TaskError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Lifetime counters for one tracker.
#[derive(Debug, Default)]
pub struct TrackerStats {
    /// Requests accepted by `track_request`.
    pub total_registered: AtomicU64,
    /// Resolved by a success response.
    pub total_succeeded: AtomicU64,
    /// Resolved by an error response from the provider.
    pub total_errored: AtomicU64,
    /// Resolved by a synthesized timeout (reaper, group deadline or stop).
    pub total_timeouts: AtomicU64,
    /// Removed via `remove_request` before resolving.
    pub total_cancelled: AtomicU64,
    /// Responses that matched no pending entry.
    pub total_unmatched: AtomicU64,
}

/// One-shot settable outcome of a tracked request.
///
/// Clones observe the same value. [`wait`](Self::wait) returns once the
/// tracker resolves the request, or with [`CommError::Cancelled`] if the
/// entry was removed without resolving.
#[derive(Debug, Clone)]
pub struct Resolution {
    id: RequestId,
    rx: watch::Receiver<Option<Response>>,
}

impl Resolution {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// The final response, if already resolved.
    pub fn try_get(&self) -> Option<Response> {
        self.rx.borrow().clone()
    }

    pub async fn wait(&mut self) -> CommResult<Response> {
        let id = self.id;
        match self.rx.wait_for(Option::is_some).await {
            Ok(settled) => settled.as_ref().cloned().ok_or(CommError::Cancelled(id)),
            Err(_) => Err(CommError::Cancelled(id)),
        }
    }
}

pub(crate) struct PendingRequest {
    request: Request,
    timeout: Duration,
    deadline: Instant,
    tracked_at: Instant,
    settle: watch::Sender<Option<Response>>,
}

impl PendingRequest {
    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    fn resolve(self, response: Response, stats: &TrackerStats) {
        let counter = if response.is_timeout() {
            &stats.total_timeouts
        } else if response.is_success() {
            &stats.total_succeeded
        } else {
            &stats.total_errored
        };
        counter.fetch_add(1, Ordering::Relaxed);

        debug!(
            request_id = %response.id(),
            task = self.request.task(),
            success = response.is_success(),
            elapsed_ms = self.tracked_at.elapsed().as_millis() as u64,
            "Resolved tracked request"
        );

        self.settle.send_replace(Some(response.clone()));
        dispatch_handler(self.request, response);
    }
}

/// Run the matching callback on the blocking pool so a slow handler cannot
/// stall the listener or reaper.
fn dispatch_handler(request: Request, response: Response) {
    let handlers = request.handlers();
    let handler = if response.is_success() {
        handlers.success.clone()
    } else {
        handlers.error.clone()
    };
    let Some(handler) = handler else {
        return;
    };

    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn_blocking(move || handler(&request, &response));
        }
        Err(_) => handler(&request, &response),
    }
}

#[derive(Default)]
pub(crate) struct Registry {
    entries: DashMap<RequestId, PendingRequest>,
    stats: TrackerStats,
}

impl Registry {
    pub(crate) fn stats(&self) -> &TrackerStats {
        &self.stats
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn contains(&self, id: &RequestId) -> bool {
        self.entries.contains_key(id)
    }

    pub(crate) fn insert(&self, request: Request, timeout: Duration) -> CommResult<Resolution> {
        let id = request.id();
        let (settle, rx) = watch::channel(None);
        let tracked_at = Instant::now();
        let deadline = tracked_at + timeout;

        match self.entries.entry(id) {
            Entry::Occupied(_) => return Err(CommError::AlreadyTracked(id)),
            Entry::Vacant(slot) => {
                debug!(
                    request_id = %id,
                    task = request.task(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Tracking request"
                );
                slot.insert(PendingRequest {
                    request,
                    timeout,
                    deadline,
                    tracked_at,
                    settle,
                });
            }
        }
        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);

        Ok(Resolution { id, rx })
    }

    /// Resolve the matching entry with an inbound response.
    pub(crate) fn handle_response(&self, response: Response) -> bool {
        match self.entries.remove(&response.id()) {
            Some((_, pending)) => {
                pending.resolve(response, &self.stats);
                true
            }
            None => {
                self.stats.total_unmatched.fetch_add(1, Ordering::Relaxed);
                warn!(
                    request_id = %response.id(),
                    "Response for unknown or expired request"
                );
                false
            }
        }
    }

    /// Cancel without resolving. Waiters observe `Cancelled`.
    pub(crate) fn remove(&self, id: &RequestId) -> bool {
        match self.entries.remove(id) {
            Some((_, pending)) => {
                self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
                debug!(request_id = %id, task = pending.request.task(), "Removed tracked request");
                true
            }
            None => false,
        }
    }

    /// Resolve one entry with a synthesized timeout, if still pending.
    pub(crate) fn expire(&self, id: &RequestId) -> bool {
        match self.entries.remove(id) {
            Some((_, pending)) => {
                let response = Response::timeout(*id, pending.timeout());
                pending.resolve(response, &self.stats);
                true
            }
            None => false,
        }
    }

    /// Resolve every entry whose deadline is at or before `now`.
    pub(crate) fn reap_expired(&self, now: Instant) -> usize {
        // Collect first: removing while iterating would deadlock on the shard lock.
        let expired: Vec<RequestId> = self
            .entries
            .iter()
            .filter(|entry| entry.deadline <= now)
            .map(|entry| *entry.key())
            .collect();

        let mut reaped = 0;
        for id in expired {
            let Some((_, pending)) = self.entries.remove_if(&id, |_, p| p.deadline <= now) else {
                continue;
            };
            warn!(
                request_id = %id,
                task = pending.request.task(),
                timeout_ms = pending.timeout.as_millis() as u64,
                "Tracked request expired"
            );
            let response = Response::timeout(id, pending.timeout());
            pending.resolve(response, &self.stats);
            reaped += 1;
        }
        reaped
    }

    /// Resolve everything still pending as a timeout. Used on shutdown.
    pub(crate) fn drain(&self, reason: &str) -> usize {
        let ids: Vec<RequestId> = self.entries.iter().map(|entry| *entry.key()).collect();
        let mut drained = 0;
        for id in ids {
            if let Some((_, pending)) = self.entries.remove(&id) {
                let error = TaskError::timeout(id, pending.timeout()).with_context("reason", reason);
                pending.resolve(Response::failure(id, error), &self.stats);
                drained += 1;
            }
        }
        drained
    }
}
