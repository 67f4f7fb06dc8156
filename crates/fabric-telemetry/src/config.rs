//! Logging configuration from environment variables.

use std::env;

/// Configuration for process logging.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name, logged once by `init_logging` to identify the process
    pub service_name: String,

    /// Log level filter (trace, debug, info, warn, error), or any
    /// `EnvFilter` directive string
    pub log_level: String,

    /// Whether to write logs to stdout at all
    pub console_output: bool,

    /// Whether to emit JSON formatted logs instead of pretty ones
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "fabric".to_string(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `FABRIC_SERVICE_NAME`: Service name (default: fabric)
    /// - `FABRIC_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `FABRIC_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `FABRIC_JSON_LOGS`: Enable JSON logs (default: false, true under systemd)
    pub fn from_env() -> Self {
        // systemd sets INVOCATION_ID for every unit it starts.
        let under_systemd = env::var("INVOCATION_ID").is_ok();

        Self {
            service_name: env::var("FABRIC_SERVICE_NAME").unwrap_or_else(|_| "fabric".to_string()),

            log_level: env::var("FABRIC_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            console_output: env::var("FABRIC_CONSOLE_OUTPUT")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(true),

            json_logs: env::var("FABRIC_JSON_LOGS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(under_systemd),
        }
    }

    /// Configuration for a named service, other fields from the environment.
    pub fn for_service(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            ..Self::from_env()
        }
    }
}
