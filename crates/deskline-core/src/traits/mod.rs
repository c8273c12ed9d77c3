// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait seams of the pipeline.
//!
//! Drivers use `#[async_trait]` so they can be held as `Arc<dyn ProviderDriver>`.

pub mod clock;
pub mod driver;

pub use clock::{Clock, SystemClock};
pub use driver::ProviderDriver;
