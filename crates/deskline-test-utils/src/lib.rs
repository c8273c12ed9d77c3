// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Deskline integration tests.
//!
//! # Components
//!
//! - [`MockDriver`] - provider driver with scripted results and recorded calls
//! - [`ManualClock`] - clock that only moves when told to
//! - [`TestHarness`] - temp database, default config, event bus, seed helpers

pub mod clock;
pub mod harness;
pub mod mock_driver;

pub use clock::ManualClock;
pub use harness::{TestHarness, TestHarnessBuilder};
pub use mock_driver::{MockDriver, SentCall};
