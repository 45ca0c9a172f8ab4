// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Core identifier and message types for the secure-conversation layer.
//!
//! The transport core treats service payloads as opaque byte strings; the
//! binary encoding of request and response bodies is owned by the encoding
//! layer above. What this module defines is the minimal envelope the
//! conversation layer needs to do its job: request identifiers, channel and
//! session identifiers, timeout hints, and status codes.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// RequestId
// =============================================================================

/// Identifier correlating a request with its eventual response.
///
/// Request ids are allocated by a [`RequestCorrelator`] instance from a
/// counter starting at 1 and are strictly increasing for the lifetime of
/// that instance. They are never reused while a request with the same id is
/// still pending, and they are not reset when the underlying channel
/// reconnects.
///
/// [`RequestCorrelator`]: https://docs.rs/uasc-client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl RequestId {
    /// Creates a request id from a raw value.
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[inline]
    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// ChannelId
// =============================================================================

/// Identifier of a secure channel, assigned by the channel implementation.
///
/// The correlator uses this to recognize a channel it has already attached
/// a close hook to, so reconnects do not stack duplicate hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub u32);

impl ChannelId {
    /// Creates a channel id from a raw value.
    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[inline]
    pub const fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// SessionId
// =============================================================================

/// Opaque identifier of an authenticated session.
///
/// Sessions are established by a higher protocol layer; the transport core
/// only records whether a connection carries one, because session-bound
/// connections are protected from capacity eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Creates a session id from an existing UUID.
    #[inline]
    pub const fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generates a fresh random session id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// StatusCode
// =============================================================================

/// OPC UA style service status code.
///
/// Only the severity bits are interpreted here; the full code is carried
/// through for the service layer to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct StatusCode(pub u32);

impl StatusCode {
    /// The all-good status.
    pub const GOOD: Self = Self(0);

    /// Creates a status code from a raw value.
    #[inline]
    pub const fn new(code: u32) -> Self {
        Self(code)
    }

    /// Returns `true` if the severity is good.
    #[inline]
    pub const fn is_good(&self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    /// Returns `true` if the severity is uncertain.
    #[inline]
    pub const fn is_uncertain(&self) -> bool {
        self.0 & 0x4000_0000 != 0 && self.0 & 0x8000_0000 == 0
    }

    /// Returns `true` if the severity is bad.
    #[inline]
    pub const fn is_bad(&self) -> bool {
        self.0 & 0x8000_0000 != 0
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

// =============================================================================
// RequestHeader
// =============================================================================

/// Header carried by every service request.
///
/// The timeout hint tells the transport how long the caller is willing to
/// wait for the matching response. A hint of zero or an absent hint means
/// the request has no deadline and no timer is allocated for it; such a
/// request can only resolve through a response, a channel failure, or an
/// explicit cancellation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestHeader {
    /// Requested timeout for the round trip. `None` disables the deadline.
    #[serde(default, with = "humantime_serde::option")]
    pub timeout_hint: Option<Duration>,
}

impl RequestHeader {
    /// Creates a header with no timeout hint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a header with the given timeout hint.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout_hint: Some(timeout),
        }
    }

    /// Returns the timeout to schedule, filtering out zero hints.
    pub fn effective_timeout(&self) -> Option<Duration> {
        self.timeout_hint.filter(|t| !t.is_zero())
    }
}

// =============================================================================
// RequestMessage
// =============================================================================

/// An encoded service request handed to the transport for delivery.
#[derive(Debug, Clone)]
pub struct RequestMessage {
    /// Request header with the caller's timeout hint.
    pub header: RequestHeader,

    /// Encoded service request body, opaque to the transport.
    pub payload: Vec<u8>,
}

impl RequestMessage {
    /// Creates a request with no timeout hint.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            header: RequestHeader::new(),
            payload: payload.into(),
        }
    }

    /// Creates a request with a timeout hint.
    pub fn with_timeout(payload: impl Into<Vec<u8>>, timeout: Duration) -> Self {
        Self {
            header: RequestHeader::with_timeout(timeout),
            payload: payload.into(),
        }
    }
}

// =============================================================================
// OutboundRequest
// =============================================================================

/// A request stamped with its correlation id, ready to write to a channel.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    /// The id the response must echo back.
    pub id: RequestId,

    /// The request being sent.
    pub message: RequestMessage,
}

impl OutboundRequest {
    /// Creates an outbound request.
    pub fn new(id: RequestId, message: RequestMessage) -> Self {
        Self { id, message }
    }
}

// =============================================================================
// ResponseMessage
// =============================================================================

/// An encoded service response received from the peer.
#[derive(Debug, Clone)]
pub struct ResponseMessage {
    /// Id of the request this response answers.
    pub request_id: RequestId,

    /// Service-level result of the operation.
    pub service_result: StatusCode,

    /// Encoded service response body, opaque to the transport.
    pub payload: Vec<u8>,
}

impl ResponseMessage {
    /// Creates a good response.
    pub fn new(request_id: RequestId, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            request_id,
            service_result: StatusCode::GOOD,
            payload: payload.into(),
        }
    }

    /// Creates a response with an explicit service result.
    pub fn with_result(
        request_id: RequestId,
        service_result: StatusCode,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            request_id,
            service_result,
            payload: payload.into(),
        }
    }

    /// Returns `true` if the service result is good.
    #[inline]
    pub fn is_good(&self) -> bool {
        self.service_result.is_good()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_severity() {
        assert!(StatusCode::GOOD.is_good());
        assert!(!StatusCode::GOOD.is_bad());

        let bad = StatusCode::new(0x8000_0000);
        assert!(bad.is_bad());
        assert!(!bad.is_good());
        assert!(!bad.is_uncertain());

        let uncertain = StatusCode::new(0x4000_0000);
        assert!(uncertain.is_uncertain());
        assert!(!uncertain.is_good());
        assert!(!uncertain.is_bad());
    }

    #[test]
    fn test_effective_timeout_filters_zero() {
        assert_eq!(RequestHeader::new().effective_timeout(), None);
        assert_eq!(
            RequestHeader::with_timeout(Duration::ZERO).effective_timeout(),
            None
        );
        assert_eq!(
            RequestHeader::with_timeout(Duration::from_millis(250)).effective_timeout(),
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_request_id_ordering() {
        assert!(RequestId::new(1) < RequestId::new(2));
        assert_eq!(RequestId::new(7).value(), 7);
    }

    #[test]
    fn test_response_message_result() {
        let ok = ResponseMessage::new(RequestId::new(1), vec![1, 2, 3]);
        assert!(ok.is_good());

        let failed =
            ResponseMessage::with_result(RequestId::new(2), StatusCode::new(0x8034_0000), vec![]);
        assert!(!failed.is_good());
    }
}
