// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client transport configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use uasc_core::error::ConfigError;
use uasc_core::types::RequestHeader;

// =============================================================================
// ClientTransportConfig
// =============================================================================

/// Configuration for a client-side transport instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientTransportConfig {
    /// Resolution of the timeout wheel.
    #[serde(default = "default_timer_tick")]
    #[serde(with = "humantime_serde")]
    pub timer_tick: Duration,

    /// Number of wheel slots, rounded up to a power of two.
    #[serde(default = "default_timer_slots")]
    pub timer_slots: usize,

    /// Timeout hint applied by [`ClientTransportConfig::request_header`]
    /// when the caller has no more specific deadline.
    #[serde(default = "default_request_timeout")]
    #[serde(with = "humantime_serde")]
    pub default_request_timeout: Duration,
}

fn default_timer_tick() -> Duration {
    Duration::from_millis(10)
}

fn default_timer_slots() -> usize {
    512
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

impl Default for ClientTransportConfig {
    fn default() -> Self {
        Self {
            timer_tick: default_timer_tick(),
            timer_slots: default_timer_slots(),
            default_request_timeout: default_request_timeout(),
        }
    }
}

impl ClientTransportConfig {
    /// Returns a builder with default values.
    pub fn builder() -> ClientTransportConfigBuilder {
        ClientTransportConfigBuilder::default()
    }

    /// Builds a request header carrying the default timeout hint.
    pub fn request_header(&self) -> RequestHeader {
        RequestHeader::with_timeout(self.default_request_timeout)
    }
}

// =============================================================================
// ClientTransportConfigBuilder
// =============================================================================

/// Builder for [`ClientTransportConfig`].
#[derive(Debug, Default, Clone)]
pub struct ClientTransportConfigBuilder {
    timer_tick: Option<Duration>,
    timer_slots: Option<usize>,
    default_request_timeout: Option<Duration>,
}

impl ClientTransportConfigBuilder {
    /// Sets the wheel tick resolution.
    pub fn timer_tick(mut self, tick: Duration) -> Self {
        self.timer_tick = Some(tick);
        self
    }

    /// Sets the wheel slot count.
    pub fn timer_slots(mut self, slots: usize) -> Self {
        self.timer_slots = Some(slots);
        self
    }

    /// Sets the default request timeout hint.
    pub fn default_request_timeout(mut self, timeout: Duration) -> Self {
        self.default_request_timeout = Some(timeout);
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> Result<ClientTransportConfig, ConfigError> {
        let config = ClientTransportConfig {
            timer_tick: self.timer_tick.unwrap_or_else(default_timer_tick),
            timer_slots: self.timer_slots.unwrap_or_else(default_timer_slots),
            default_request_timeout: self
                .default_request_timeout
                .unwrap_or_else(default_request_timeout),
        };

        if config.timer_tick.is_zero() {
            return Err(ConfigError::invalid("timer_tick", "must be non-zero"));
        }
        if config.timer_slots == 0 {
            return Err(ConfigError::invalid("timer_slots", "must be non-zero"));
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
        let config = ClientTransportConfig::default();
        assert_eq!(config.timer_tick, Duration::from_millis(10));
        assert_eq!(config.timer_slots, 512);
    }

    #[test]
    fn test_builder_rejects_zero_tick() {
        let err = ClientTransportConfig::builder()
            .timer_tick(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("timer_tick"));
    }

    #[test]
    fn test_request_header_carries_default_timeout() {
        let config = ClientTransportConfig::builder()
            .default_request_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        let header = config.request_header();
        assert_eq!(header.effective_timeout(), Some(Duration::from_secs(5)));
    }
}
