//! # RCL Telemetry
//!
//! Structured logging for the RCL core and the binaries built on it.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rcl_telemetry::{init_logging, TelemetryConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&TelemetryConfig::for_service("talker"))?;
//!     // rcl_core logs wait, take and correlation activity from here on
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `RCL_SERVICE_NAME` | `rcl` | Service name in the startup line |
//! | `RCL_LOG_LEVEL` / `RUST_LOG` | `info` | Filter directive |
//! | `RCL_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `RCL_JSON_LOGS` | `false` (`true` in containers) | JSON lines output |

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::{build_filter, init_logging};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to install tracing subscriber: {0}")]
    SubscriberInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging from the environment for `service_name`.
pub fn init_from_env(service_name: &str) -> Result<TelemetryConfig, TelemetryError> {
    let config = TelemetryConfig::for_service(service_name);
    init_logging(&config)?;
    Ok(config)
}
