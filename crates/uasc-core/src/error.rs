// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Transport error types for the secure-conversation layer.
//!
//! Every failure mode of a sent request is delivered through the request's
//! future, never thrown synchronously, so callers have exactly one place to
//! observe the outcome:
//!
//! ```text
//! TransportError
//! ├── ChannelUnavailable - no channel could be obtained before sending
//! ├── WriteFailure       - the channel write itself failed
//! ├── Timeout            - no response within the request's timeout hint
//! ├── ChannelError       - transport fault while the request was in flight
//! ├── ChannelClosed      - channel went inactive while in flight
//! └── Cancelled          - caller abandoned the request
//! ```
//!
//! Server-side bind failures are the one exception: they surface
//! synchronously from `bind` as [`BindError`].

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tracing::Level;

// =============================================================================
// TransportError
// =============================================================================

/// Failure of a single request on the secure-conversation transport.
///
/// No variant is retried internally; retry and reconnect policy belongs to
/// the session layer above.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No secure channel could be obtained before attempting to send.
    #[error("no secure channel available: {reason}")]
    ChannelUnavailable {
        /// Why channel acquisition failed.
        reason: String,
    },

    /// The write of the request to the channel failed.
    #[error("failed to write request to channel")]
    WriteFailure {
        /// The underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// No response arrived within the request's timeout hint.
    #[error("request timed out after {after:?}")]
    Timeout {
        /// The deadline that elapsed.
        after: Duration,
    },

    /// The channel reported a transport-level fault while the request was
    /// in flight.
    #[error("secure channel fault: {detail}")]
    ChannelError {
        /// Fault description reported by the channel.
        detail: String,
    },

    /// The channel became inactive while the request was in flight.
    #[error("secure channel closed")]
    ChannelClosed,

    /// The caller abandoned the request before it resolved.
    #[error("request cancelled by caller")]
    Cancelled,
}

impl TransportError {
    /// Creates a `ChannelUnavailable` error.
    pub fn channel_unavailable(reason: impl Into<String>) -> Self {
        Self::ChannelUnavailable {
            reason: reason.into(),
        }
    }

    /// Creates a `WriteFailure` error from the underlying I/O cause.
    pub fn write_failure(source: io::Error) -> Self {
        Self::WriteFailure { source }
    }

    /// Creates a `Timeout` error.
    pub fn timeout(after: Duration) -> Self {
        Self::Timeout { after }
    }

    /// Creates a `ChannelError` error.
    pub fn channel_error(detail: impl Into<String>) -> Self {
        Self::ChannelError {
            detail: detail.into(),
        }
    }

    /// Short machine-readable category, stable for logging and metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::ChannelUnavailable { .. } => "channel_unavailable",
            Self::WriteFailure { .. } => "write_failure",
            Self::Timeout { .. } => "timeout",
            Self::ChannelError { .. } => "channel_error",
            Self::ChannelClosed => "channel_closed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns `true` if retrying the request on a fresh channel could
    /// plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ChannelUnavailable { .. }
            | Self::Timeout { .. }
            | Self::ChannelError { .. }
            | Self::ChannelClosed => true,
            Self::WriteFailure { .. } => true,
            Self::Cancelled => false,
        }
    }

    /// Suggested log level for this error.
    pub fn severity(&self) -> Level {
        match self {
            Self::Cancelled => Level::DEBUG,
            Self::Timeout { .. } | Self::ChannelClosed => Level::WARN,
            _ => Level::ERROR,
        }
    }
}

/// Result alias for request-level transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

// =============================================================================
// BindError
// =============================================================================

/// Failure to bind a server listener.
///
/// Bind failures are fatal to the individual `bind` call and leave no
/// partial listener or registry state behind.
#[derive(Debug, Error)]
pub enum BindError {
    /// The listening socket could not be bound.
    #[error("failed to bind listener on {addr}")]
    Bind {
        /// The address that could not be bound.
        addr: SocketAddr,
        /// The underlying I/O failure.
        #[source]
        source: io::Error,
    },
}

impl BindError {
    /// Creates a bind error for the given address.
    pub fn bind(addr: SocketAddr, source: io::Error) -> Self {
        Self::Bind { addr, source }
    }
}

/// Result alias for listener lifecycle operations.
pub type BindResult<T> = Result<T, BindError>;

// =============================================================================
// ConfigError
// =============================================================================

/// Invalid transport configuration.
#[derive(Debug, Error)]
#[error("invalid configuration: {field}: {reason}")]
pub struct ConfigError {
    /// The offending field.
    pub field: &'static str,
    /// Why the value was rejected.
    pub reason: String,
}

impl ConfigError {
    /// Creates a configuration error.
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_types_are_stable() {
        assert_eq!(
            TransportError::channel_unavailable("none").error_type(),
            "channel_unavailable"
        );
        assert_eq!(
            TransportError::timeout(Duration::from_millis(50)).error_type(),
            "timeout"
        );
        assert_eq!(TransportError::ChannelClosed.error_type(), "channel_closed");
        assert_eq!(TransportError::Cancelled.error_type(), "cancelled");
    }

    #[test]
    fn test_retryability() {
        assert!(TransportError::timeout(Duration::from_secs(1)).is_retryable());
        assert!(TransportError::ChannelClosed.is_retryable());
        assert!(!TransportError::Cancelled.is_retryable());
    }

    #[test]
    fn test_write_failure_preserves_cause() {
        let err = TransportError::write_failure(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "peer reset",
        ));
        let source = std::error::Error::source(&err).expect("source");
        assert!(source.to_string().contains("peer reset"));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::invalid("capacity", "must fit in u32");
        assert!(err.to_string().contains("capacity"));
    }
}
