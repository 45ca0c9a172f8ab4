// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Fixtures for transport tests.

use std::net::SocketAddr;
use std::time::Duration;

use uasc_client::config::ClientTransportConfig;
use uasc_core::types::RequestMessage;
use uasc_server::binding::ApplicationContext;
use uasc_server::config::ServerTransportConfig;

/// Request fixtures.
pub struct RequestFixtures;

impl RequestFixtures {
    /// A request with no deadline.
    pub fn untimed() -> RequestMessage {
        RequestMessage::new(b"read attribute".to_vec())
    }

    /// A request that times out after `ms` milliseconds.
    pub fn timed(ms: u64) -> RequestMessage {
        RequestMessage::with_timeout(b"read attribute".to_vec(), Duration::from_millis(ms))
    }
}

/// Configuration fixtures.
pub struct ConfigFixtures;

impl ConfigFixtures {
    /// Client config with a fine-grained wheel for fast deadline tests.
    pub fn fast_client() -> ClientTransportConfig {
        ClientTransportConfig::builder()
            .timer_tick(Duration::from_millis(5))
            .timer_slots(64)
            .build()
            .expect("valid client config")
    }

    /// Server config with the given capacity.
    pub fn server_with_capacity(capacity: usize) -> ServerTransportConfig {
        ServerTransportConfig::builder()
            .capacity(capacity)
            .build()
            .expect("valid server config")
    }
}

/// Server context fixtures.
pub struct ContextFixtures;

impl ContextFixtures {
    /// The usual test application context.
    pub fn test_server() -> ApplicationContext {
        ApplicationContext::new("uasc-test-server")
    }
}

/// Loopback address with an ephemeral port.
pub fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().expect("loopback address")
}
