// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uasc-client
//!
//! Client half of the UASC secure-conversation transport: request/response
//! correlation over a shared, possibly-reconnecting secure channel.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      RequestCorrelator                          │
//! │     (id allocation, pending map, single-winner completion)      │
//! └─────────────────────────────────────────────────────────────────┘
//!          │                    │                     │
//!          ▼                    ▼                     ▼
//! ┌─────────────────┐ ┌──────────────────┐ ┌──────────────────────┐
//! │   TimerWheel    │ │ CompletionSeq.   │ │  ChannelSupplier     │
//! │ (per-request    │ │ (FIFO worker for │ │  (external channel   │
//! │  deadlines)     │ │  completions)    │ │   lifecycle)         │
//! └─────────────────┘ └──────────────────┘ └──────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use uasc_client::RequestCorrelator;
//! use uasc_core::types::RequestMessage;
//! use std::time::Duration;
//!
//! let correlator = RequestCorrelator::new(supplier);
//! let response = correlator
//!     .send(RequestMessage::with_timeout(encoded, Duration::from_secs(5)))
//!     .await?;
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod correlator;
pub mod sequencer;
pub mod timer;

// Re-exports for convenience
pub use config::{ClientTransportConfig, ClientTransportConfigBuilder};
pub use correlator::{CorrelatorStats, RequestCorrelator, ResponseFuture};
pub use sequencer::{CompletionSequencer, SequencerStats};
pub use timer::{TimerHandle, TimerStats, TimerWheel};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
