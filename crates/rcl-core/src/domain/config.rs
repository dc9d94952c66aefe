//! Middleware configuration and validation
//!
//! # Example
//!
//! ```ignore
//! use rcl_core::domain::RclConfigBuilder;
//!
//! let config = RclConfigBuilder::new()
//!     .default_queue_depth(5)
//!     .max_wait_set_capacity(1024)
//!     .build()?;
//! ```

use crate::domain::errors::{RclError, RclResult};
use serde::{Deserialize, Serialize};
use std::env;

/// Identifier reported by `rmw_identifier()` unless overridden.
pub const DEFAULT_RMW_IDENTIFIER: &str = "rmw_inproc_cpp";

/// Upper bound for `domain_id`.
pub const MAX_DOMAIN_ID: u32 = 232;

/// Context configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RclConfig {
    /// Name reported as the middleware implementation.
    pub rmw_identifier: String,
    /// Domain the context participates in.
    pub domain_id: u32,
    /// Keep-last depth for subscription, service and client queues.
    pub default_queue_depth: usize,
    /// Largest per-kind capacity a wait set may reserve.
    pub max_wait_set_capacity: usize,
}

impl Default for RclConfig {
    fn default() -> Self {
        Self {
            rmw_identifier: DEFAULT_RMW_IDENTIFIER.to_string(),
            domain_id: 0,
            default_queue_depth: 10,
            max_wait_set_capacity: 65_536,
        }
    }
}

impl RclConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `RCL_RMW_IMPLEMENTATION`: middleware identifier (default: rmw_inproc_cpp)
    /// - `ROS_DOMAIN_ID`: domain id (default: 0)
    /// - `RCL_QUEUE_DEPTH`: default keep-last depth (default: 10)
    /// - `RCL_MAX_WAIT_SET_CAPACITY`: per-kind wait set limit (default: 65536)
    ///
    /// Unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            rmw_identifier: env::var("RCL_RMW_IMPLEMENTATION")
                .unwrap_or(defaults.rmw_identifier),
            domain_id: env::var("ROS_DOMAIN_ID")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.domain_id),
            default_queue_depth: env::var("RCL_QUEUE_DEPTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.default_queue_depth),
            max_wait_set_capacity: env::var("RCL_MAX_WAIT_SET_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_wait_set_capacity),
        }
    }

    /// Validate configuration boundaries.
    pub fn validate(&self) -> RclResult<()> {
        if self.rmw_identifier.is_empty() {
            return Err(RclError::InvalidArgument(
                "rmw_identifier cannot be empty".to_string(),
            ));
        }

        if self.domain_id > MAX_DOMAIN_ID {
            return Err(RclError::InvalidArgument(format!(
                "domain_id {} exceeds maximum {}",
                self.domain_id, MAX_DOMAIN_ID
            )));
        }

        if self.default_queue_depth == 0 {
            return Err(RclError::InvalidArgument(
                "default_queue_depth cannot be 0".to_string(),
            ));
        }

        if self.max_wait_set_capacity == 0 {
            return Err(RclError::InvalidArgument(
                "max_wait_set_capacity cannot be 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for [`RclConfig`] with validation.
#[derive(Default)]
pub struct RclConfigBuilder {
    rmw_identifier: Option<String>,
    domain_id: Option<u32>,
    default_queue_depth: Option<usize>,
    max_wait_set_capacity: Option<usize>,
}

impl RclConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the reported middleware identifier
    pub fn rmw_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.rmw_identifier = Some(identifier.into());
        self
    }

    /// Set the domain id
    pub fn domain_id(mut self, domain_id: u32) -> Self {
        self.domain_id = Some(domain_id);
        self
    }

    /// Set the default keep-last depth
    pub fn default_queue_depth(mut self, depth: usize) -> Self {
        self.default_queue_depth = Some(depth);
        self
    }

    /// Set the per-kind wait set capacity limit
    pub fn max_wait_set_capacity(mut self, capacity: usize) -> Self {
        self.max_wait_set_capacity = Some(capacity);
        self
    }

    /// Build and validate
    pub fn build(self) -> RclResult<RclConfig> {
        let defaults = RclConfig::default();
        let config = RclConfig {
            rmw_identifier: self.rmw_identifier.unwrap_or(defaults.rmw_identifier),
            domain_id: self.domain_id.unwrap_or(defaults.domain_id),
            default_queue_depth: self
                .default_queue_depth
                .unwrap_or(defaults.default_queue_depth),
            max_wait_set_capacity: self
                .max_wait_set_capacity
                .unwrap_or(defaults.max_wait_set_capacity),
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RclConfig::default();
        assert_eq!(config.rmw_identifier, DEFAULT_RMW_IDENTIFIER);
        assert_eq!(config.default_queue_depth, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = RclConfigBuilder::new()
            .default_queue_depth(3)
            .domain_id(7)
            .build()
            .unwrap();
        assert_eq!(config.default_queue_depth, 3);
        assert_eq!(config.domain_id, 7);
    }

    #[test]
    fn test_zero_depth_rejected() {
        let result = RclConfigBuilder::new().default_queue_depth(0).build();
        assert!(matches!(result, Err(RclError::InvalidArgument(_))));
    }

    #[test]
    fn test_domain_id_bound() {
        let result = RclConfigBuilder::new().domain_id(MAX_DOMAIN_ID + 1).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_serialization() {
        let config = RclConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: RclConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }
}
