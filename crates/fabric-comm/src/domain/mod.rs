//! Domain types for the fabric: envelopes, addresses, errors and configuration.

pub mod address;
pub mod config;
pub mod correlation;
pub mod envelope;
pub mod error;

pub use address::Address;
pub use config::{CommConfig, ConfigError, TrackerConfig, TransportConfig};
pub use correlation::RequestId;
pub use envelope::{Request, RequestBuilder, Response, ResponseHandler};
pub use error::{CommError, CommResult, ErrorKind, TaskError};
