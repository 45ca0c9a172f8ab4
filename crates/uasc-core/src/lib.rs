// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uasc-core
//!
//! Core abstractions shared by the UASC secure-conversation transport
//! stack.
//!
//! This crate provides the foundational pieces used by both the client and
//! server halves of the transport:
//!
//! - **Types**: `RequestId`, `ChannelId`, `SessionId`, `StatusCode`, and
//!   the request/response message envelopes
//! - **Error**: the `TransportError` taxonomy delivered through request
//!   futures, plus listener `BindError`
//! - **Channel**: the `SecureChannel` / `ChannelSupplier` seams the client
//!   correlator works against, and the server-side `ConnectionHandle`
//!
//! The binary encoding of service bodies, the address-space model, session
//! establishment, and the secure-channel handshake are all external to this
//! stack; payloads pass through as opaque bytes.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use uasc_core::types::{RequestMessage, StatusCode};
//!
//! let request = RequestMessage::with_timeout(b"read".to_vec(), Duration::from_millis(500));
//! assert!(request.header.effective_timeout().is_some());
//! assert!(StatusCode::GOOD.is_good());
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod channel;
pub mod error;
pub mod types;

// Re-exports for convenience
pub use channel::{ChannelSupplier, CloseHook, CloseReason, ConnectionHandle, SecureChannel};
pub use error::{BindError, BindResult, ConfigError, TransportError, TransportResult};
pub use types::{
    ChannelId, OutboundRequest, RequestHeader, RequestId, RequestMessage, ResponseMessage,
    SessionId, StatusCode,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
