// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Server transport configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use uasc_core::error::ConfigError;

// =============================================================================
// ServerTransportConfig
// =============================================================================

/// Configuration for a server-side transport binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerTransportConfig {
    /// Hard bound on concurrently live connections.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Pause before retrying `accept` after a transient listener error,
    /// typically file-descriptor exhaustion.
    #[serde(default = "default_accept_retry_delay")]
    #[serde(with = "humantime_serde")]
    pub accept_retry_delay: Duration,
}

fn default_capacity() -> usize {
    100
}

fn default_accept_retry_delay() -> Duration {
    Duration::from_millis(100)
}

impl Default for ServerTransportConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            accept_retry_delay: default_accept_retry_delay(),
        }
    }
}

impl ServerTransportConfig {
    /// Returns a builder with default values.
    pub fn builder() -> ServerTransportConfigBuilder {
        ServerTransportConfigBuilder::default()
    }
}

// =============================================================================
// ServerTransportConfigBuilder
// =============================================================================

/// Builder for [`ServerTransportConfig`].
#[derive(Debug, Default, Clone)]
pub struct ServerTransportConfigBuilder {
    capacity: Option<usize>,
    accept_retry_delay: Option<Duration>,
}

impl ServerTransportConfigBuilder {
    /// Sets the connection capacity. Zero is legal and rejects every
    /// connection.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Sets the accept retry pause.
    pub fn accept_retry_delay(mut self, delay: Duration) -> Self {
        self.accept_retry_delay = Some(delay);
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> Result<ServerTransportConfig, ConfigError> {
        let config = ServerTransportConfig {
            capacity: self.capacity.unwrap_or_else(default_capacity),
            accept_retry_delay: self
                .accept_retry_delay
                .unwrap_or_else(default_accept_retry_delay),
        };

        if config.accept_retry_delay.is_zero() {
            return Err(ConfigError::invalid(
                "accept_retry_delay",
                "must be non-zero",
            ));
        }

        Ok(config)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerTransportConfig::default();
        assert_eq!(config.capacity, 100);
        assert_eq!(config.accept_retry_delay, Duration::from_millis(100));
    }

    #[test]
    fn test_builder_allows_zero_capacity() {
        let config = ServerTransportConfig::builder()
            .capacity(0)
            .build()
            .unwrap();
        assert_eq!(config.capacity, 0);
    }

    #[test]
    fn test_builder_rejects_zero_retry_delay() {
        let err = ServerTransportConfig::builder()
            .accept_retry_delay(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("accept_retry_delay"));
    }
}
