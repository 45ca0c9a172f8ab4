// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uasc-tests
//!
//! Integration tests and shared test harness for the UASC transport stack.
//!
//! The `common` module provides scripted channel and supplier mocks for the
//! client half, connection handlers for the server half, and fixtures for
//! requests and configurations. The actual scenarios live under `tests/`.

#![deny(unsafe_code)]

pub mod common;
