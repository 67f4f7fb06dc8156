//! # Stats Pusher
//!
//! Reports which cluster bundles run on this node. Each round gathers the
//! node serial, the running systemd units and the bundles known to cluster
//! configuration, then sends one `bundle-heartbeat` per matched bundle.
//! All calls go through a [`fabric_comm::Tracker`].

pub mod config;
pub mod error;
pub mod pusher;
pub mod tasks;

pub use config::PusherConfig;
pub use error::PusherError;
pub use pusher::{extract_bundles, StatsPusher};
