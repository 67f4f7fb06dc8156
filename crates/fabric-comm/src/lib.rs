//! fabric-comm - Asynchronous request/response correlation for node-local
//! task providers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────── caller process ─────────────────────────┐
//! │                                                                 │
//! │  Request::builder ──► Tracker::track_request ──► Sender::send ──┼──► provider
//! │        (id)              (stamps hook,            (frame + ack) │       │
//! │                           deadline)                             │       │
//! │                              │                                  │       │
//! │   ┌──────────────────────────┴──────────────┐                   │       │
//! │   │             Pending registry            │◄── reaper (tick)  │       │
//! │   │  DashMap<RequestId, PendingRequest>     │                   │       │
//! │   └──────────────────────────┬──────────────┘                   │       │
//! │                              │ resolve once                     │       │
//! │               Resolution ◄───┴───► on_success / on_error        │       │
//! │                                                                 │       │
//! │   EnvelopeListener (tracker URL) ◄──────────────────────────────┼── Response
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`MultiRequest`] groups several tracked requests behind one join, and
//! [`Provider`] is the serving side: it runs named [`TaskHandler`]s and
//! answers on each request's response hook.
//!
//! # Usage
//!
//! ```ignore
//! use fabric_comm::{Address, Request, Sender, Tracker, TrackerConfig, TransportConfig};
//!
//! let tracker = Tracker::new(TrackerConfig::new(Address::tcp("127.0.0.1:0")));
//! tracker.start().await?;
//!
//! let mut req = Request::builder("metrics-host").build()?;
//! let mut resolution = tracker.track_request(&mut req, Duration::from_secs(5))?;
//! Sender::new(TransportConfig::default()).send(&req).await?;
//! let response = resolution.wait().await?;
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod domain;
pub mod multi;
pub mod provider;
pub mod tracker;
pub mod transport;

pub use domain::{
    Address, CommConfig, CommError, CommResult, ConfigError, ErrorKind, Request, RequestBuilder,
    RequestId, Response, ResponseHandler, TaskError, TrackerConfig, TransportConfig,
};
pub use multi::MultiRequest;
pub use provider::{FnTask, Provider, TaskHandler};
pub use tracker::{Resolution, Tracker, TrackerStats};
pub use transport::{send_envelope, EnvelopeListener, Sender};
