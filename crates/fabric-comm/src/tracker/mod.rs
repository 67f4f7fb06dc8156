//! Tracker: correlates locally issued requests with their responses.
//!
//! Flow:
//! 1. Caller builds a [`Request`] and calls [`Tracker::track_request`], which
//!    stamps the tracker's listening address as the response hook and
//!    returns a [`Resolution`]
//! 2. Caller sends the request (see [`Sender`](crate::Sender))
//! 3. The provider sends a [`Response`] to the hook; the listener resolves
//!    the entry, settles the resolution and dispatches the matching handler
//! 4. If nothing arrives before the deadline the reaper resolves the entry
//!    with a timeout error instead
//!
//! Each entry moves out of `Pending` exactly once. A response racing its own
//! deadline, or racing [`Tracker::remove_request`], is settled by whichever
//! path removes the entry first; the loser is a no-op. In particular a
//! response that arrives while the caller removes the request may be
//! delivered or silently dropped. That race is inherent to best-effort
//! cancellation.
//!
//! Handlers must not assume they run on the caller's task. They may track
//! new requests; resolution happens outside the registry locks.

mod pending;

pub use pending::{Resolution, TrackerStats};

use crate::domain::address::Address;
use crate::domain::config::TrackerConfig;
use crate::domain::correlation::RequestId;
use crate::domain::envelope::{Request, Response};
use crate::domain::error::{CommError, CommResult};
use crate::transport::EnvelopeListener;
use parking_lot::Mutex;
use pending::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

enum State {
    Idle,
    Running(Running),
}

struct Running {
    address: Address,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// Registry of in-flight requests plus the listener and reaper serving it.
///
/// Trackers are explicit instances; a process may run several (one per
/// component, or one per test) without interference.
pub struct Tracker {
    config: TrackerConfig,
    registry: Arc<Registry>,
    state: Mutex<State>,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            registry: Arc::new(Registry::default()),
            state: Mutex::new(State::Idle),
        }
    }

    /// Bind the listening endpoint and start the listener and reaper.
    ///
    /// Returns the bound address. Calling `start` on a running tracker is a
    /// no-op. A bind failure is fatal and returned as [`CommError::Bind`].
    pub async fn start(&self) -> CommResult<Address> {
        if let Some(address) = self.url() {
            return Ok(address);
        }

        let listener = EnvelopeListener::bind(&self.config.listen).await?;
        let address = listener.local_address().clone();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let registry = self.registry.clone();
        let listen_task = tokio::spawn(listener.serve(
            move |response: Response| {
                registry.handle_response(response);
            },
            shutdown_rx.clone(),
        ));
        let reap_task = tokio::spawn(run_reaper(
            self.registry.clone(),
            self.config.reap_interval,
            shutdown_rx,
        ));

        let mut state = self.state.lock();
        if let State::Running(existing) = &*state {
            // Lost a concurrent start; stand down.
            let _ = shutdown.send(true);
            return Ok(existing.address.clone());
        }
        *state = State::Running(Running {
            address: address.clone(),
            shutdown,
            tasks: vec![listen_task, reap_task],
        });
        drop(state);

        info!(address = %address, "Tracker started");
        Ok(address)
    }

    /// Stop listening and resolve every still-pending request as a timeout,
    /// so no caller waits on a dead tracker.
    pub async fn stop(&self) {
        let running = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, State::Idle) {
                State::Running(running) => running,
                State::Idle => return,
            }
        };

        let _ = running.shutdown.send(true);
        for task in running.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Tracker task failed during shutdown");
            }
        }

        let drained = self.registry.drain("tracker stopped");
        info!(address = %running.address, drained, "Tracker stopped");
    }

    /// Listening address, while running. Callers may embed it in custom hooks.
    pub fn url(&self) -> Option<Address> {
        match &*self.state.lock() {
            State::Running(running) => Some(running.address.clone()),
            State::Idle => None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(&*self.state.lock(), State::Running(_))
    }

    pub fn default_timeout(&self) -> Duration {
        self.config.default_timeout
    }

    /// Register `request` and stamp its response hook.
    ///
    /// # Errors
    ///
    /// - `InvalidTimeout` if `timeout` is zero
    /// - `NotRunning` if the tracker is not listening
    /// - `AlreadyTracked` if the request ID is already pending
    pub fn track_request(&self, request: &mut Request, timeout: Duration) -> CommResult<Resolution> {
        if timeout.is_zero() {
            return Err(CommError::InvalidTimeout);
        }

        // Held across the insert so `stop` cannot drain between the two.
        let state = self.state.lock();
        let State::Running(running) = &*state else {
            return Err(CommError::NotRunning);
        };
        if self.registry.contains(&request.id()) {
            return Err(CommError::AlreadyTracked(request.id()));
        }

        request.set_response_hook(running.address.clone());
        self.registry.insert(request.clone(), timeout)
    }

    /// Best-effort cancellation. Returns whether an entry was removed.
    /// Never invokes handlers; removing twice is a no-op.
    pub fn remove_request(&self, request: &Request) -> bool {
        self.registry.remove(&request.id())
    }

    /// Resolve a pending entry with `response`. This is what the listener
    /// calls; it is public for in-process delivery. Unknown IDs are logged
    /// and dropped.
    pub fn handle_response(&self, response: Response) -> bool {
        self.registry.handle_response(response)
    }

    /// Resolve `id` as a timeout now, if still pending.
    pub(crate) fn expire_request(&self, id: &RequestId) -> bool {
        self.registry.expire(id)
    }

    /// One reaper sweep. Returns the number of expired entries.
    pub fn reap_expired(&self) -> usize {
        self.registry.reap_expired(Instant::now())
    }

    pub fn pending_count(&self) -> usize {
        self.registry.len()
    }

    pub fn is_pending(&self, id: &RequestId) -> bool {
        self.registry.contains(id)
    }

    pub fn stats(&self) -> &TrackerStats {
        self.registry.stats()
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        if let State::Running(running) = &*self.state.lock() {
            let _ = running.shutdown.send(true);
        }
    }
}

async fn run_reaper(registry: Arc<Registry>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let reaped = registry.reap_expired(Instant::now());
                if reaped > 0 {
                    debug!(reaped, "Reaped expired requests");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
