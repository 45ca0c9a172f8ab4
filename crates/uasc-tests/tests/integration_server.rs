// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Server Integration Tests
//!
//! Admission scenarios over real loopback sockets:
//!
//! - Eviction of the oldest session-less connection at capacity
//! - Rejection when every live connection is session-bound
//! - Unbind closing everything and rebinding fresh

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use uasc_core::types::SessionId;
use uasc_server::binding::TransportBinding;

use uasc_tests::common::fixtures::{loopback, ConfigFixtures, ContextFixtures};
use uasc_tests::common::mocks::HoldConnectionHandler;
use uasc_tests::common::{init_test_logging, wait_until};

fn binding_with_capacity(capacity: usize) -> (TransportBinding, Arc<HoldConnectionHandler>) {
    let handler = HoldConnectionHandler::new();
    let binding = TransportBinding::new(
        ConfigFixtures::server_with_capacity(capacity),
        handler.clone(),
    );
    (binding, handler)
}

/// Reads until the peer closes; passes on clean EOF or reset.
async fn assert_peer_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .expect("peer closed in time");
    assert!(matches!(read, Ok(0) | Err(_)), "expected closed peer");
}

// =============================================================================
// Eviction
// =============================================================================

#[tokio::test]
async fn test_oldest_sessionless_connection_is_evicted_at_capacity() {
    init_test_logging();
    let (binding, handler) = binding_with_capacity(2);
    let context = ContextFixtures::test_server();
    let addr = binding.bind(&context, loopback()).await.unwrap();

    let mut a = TcpStream::connect(addr).await.unwrap();
    let registry = Arc::clone(binding.registry());
    wait_until(move || registry.len() == 1).await;
    let a_key = binding.registry().snapshot()[0].key();

    let _b = TcpStream::connect(addr).await.unwrap();
    let registry = Arc::clone(binding.registry());
    wait_until(move || registry.len() == 2).await;

    // The third connection pushes the live set over capacity; A is the
    // oldest session-less connection and gets evicted.
    let _c = TcpStream::connect(addr).await.unwrap();
    let admission = Arc::clone(binding.admission());
    wait_until(move || admission.stats().evicted() == 1).await;

    assert_eq!(binding.registry().len(), 2);
    let remaining: Vec<_> = binding
        .registry()
        .snapshot()
        .iter()
        .map(|record| record.key())
        .collect();
    assert!(!remaining.contains(&a_key), "A must be gone from the live set");

    assert_peer_closed(&mut a).await;
    let handler_seen = handler.clone();
    wait_until(move || handler_seen.handled() == 3).await;

    binding.unbind().await;
}

// =============================================================================
// Rejection
// =============================================================================

#[tokio::test]
async fn test_new_connection_rejected_when_all_session_bound() {
    let (binding, handler) = binding_with_capacity(2);
    let context = ContextFixtures::test_server();
    let addr = binding.bind(&context, loopback()).await.unwrap();

    let _a = TcpStream::connect(addr).await.unwrap();
    let _b = TcpStream::connect(addr).await.unwrap();
    let registry = Arc::clone(binding.registry());
    wait_until(move || registry.len() == 2).await;

    // The session layer binds both connections, protecting them.
    let live_before: Vec<_> = binding.registry().snapshot();
    for record in &live_before {
        assert!(record.bind_session(SessionId::generate()));
    }

    let mut c = TcpStream::connect(addr).await.unwrap();
    let admission = Arc::clone(binding.admission());
    wait_until(move || admission.stats().rejected() == 1).await;

    // C was closed without ever joining the live set.
    assert_peer_closed(&mut c).await;
    assert_eq!(binding.registry().len(), 2);
    let keys_after: Vec<_> = binding
        .registry()
        .snapshot()
        .iter()
        .map(|record| record.key())
        .collect();
    let keys_before: Vec<_> = live_before.iter().map(|record| record.key()).collect();
    assert_eq!(keys_after, keys_before);
    let handler_seen = handler.clone();
    wait_until(move || handler_seen.handled() == 2).await;

    binding.unbind().await;
}

// =============================================================================
// Unbind / rebind
// =============================================================================

#[tokio::test]
async fn test_unbind_closes_everything_and_rebind_starts_fresh() {
    let (binding, _handler) = binding_with_capacity(4);
    let context = ContextFixtures::test_server();
    let addr = binding.bind(&context, loopback()).await.unwrap();

    let mut a = TcpStream::connect(addr).await.unwrap();
    let mut b = TcpStream::connect(addr).await.unwrap();
    let registry = Arc::clone(binding.registry());
    wait_until(move || registry.len() == 2).await;

    // Session-bound connections are not spared by unbind.
    binding.registry().snapshot()[0].bind_session(SessionId::generate());

    binding.unbind().await;
    assert!(binding.registry().is_empty());
    assert_eq!(binding.bound_count().await, 0);
    assert_peer_closed(&mut a).await;
    assert_peer_closed(&mut b).await;

    // The same address binds again with an empty registry behind it.
    let rebound = binding.bind(&context, addr).await.unwrap();
    assert_eq!(rebound, addr);

    let _c = TcpStream::connect(addr).await.unwrap();
    let registry = Arc::clone(binding.registry());
    wait_until(move || registry.len() == 1).await;

    binding.unbind().await;
}

// =============================================================================
// Capacity bound under churn
// =============================================================================

#[tokio::test]
async fn test_live_set_never_exceeds_capacity_under_burst() {
    let (binding, _handler) = binding_with_capacity(3);
    let context = ContextFixtures::test_server();
    let addr = binding.bind(&context, loopback()).await.unwrap();

    let mut clients = Vec::new();
    for _ in 0..10 {
        clients.push(TcpStream::connect(addr).await.unwrap());
    }

    let admission = Arc::clone(binding.admission());
    wait_until(move || admission.stats().admitted() == 10).await;

    assert_eq!(binding.registry().len(), 3);
    assert_eq!(binding.admission().stats().evicted(), 7);
    assert_eq!(binding.admission().stats().rejected(), 0);

    binding.unbind().await;
}
