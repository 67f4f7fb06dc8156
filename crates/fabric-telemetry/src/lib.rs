//! # Fabric Telemetry
//!
//! Logging bootstrap shared by fabric binaries.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fabric_telemetry::{init_logging, TelemetryConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&TelemetryConfig::for_service("stats-pusher"))?;
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `FABRIC_SERVICE_NAME` | `fabric` | Service name logged at startup |
//! | `FABRIC_LOG_LEVEL` / `RUST_LOG` | `info` | Log level filter |
//! | `FABRIC_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `FABRIC_JSON_LOGS` | `false` (`true` under systemd) | JSON instead of pretty output |

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::init_logging;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter: {0}")]
    Filter(String),

    #[error("Failed to install subscriber: {0}")]
    Init(String),
}
