// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WhatsApp provider drivers for Deskline.
//!
//! Three upstream gateways are supported behind the
//! [`ProviderDriver`](deskline_core::ProviderDriver) trait:
//!
//! - [`WppconnectDriver`]: a self-hosted WPPConnect server. Accepts raw
//!   channel ids (`...@c.us`, `...@lid`) verbatim.
//! - [`CloudApiDriver`]: Meta's WhatsApp Business Cloud API.
//! - [`ElmujibDriver`]: the Elmujib hosted gateway.
//!
//! Drivers never return `Err` for a failed send; the failure is classified
//! into an [`ErrorKind`](deskline_core::ErrorKind) and carried in the
//! [`SendResult`](deskline_core::SendResult).

pub mod classify;
pub mod cloud_api;
pub mod elmujib;
mod http;
pub mod phone;
pub mod wppconnect;

use std::sync::Arc;

use deskline_config::model::{ProviderConfig, ProviderKind};
use deskline_core::{DesklineError, ProviderDriver};

pub use cloud_api::CloudApiDriver;
pub use elmujib::ElmujibDriver;
pub use phone::normalize_phone;
pub use wppconnect::WppconnectDriver;

/// Build the driver selected by `[provider].driver`.
pub fn build_driver(config: &ProviderConfig) -> Result<Arc<dyn ProviderDriver>, DesklineError> {
    tracing::info!(provider = %config.driver, "initialising provider driver");
    let driver: Arc<dyn ProviderDriver> = match config.driver {
        ProviderKind::Wppconnect => Arc::new(WppconnectDriver::new(config)?),
        ProviderKind::CloudApi => Arc::new(CloudApiDriver::new(config)?),
        ProviderKind::Elmujib => Arc::new(ElmujibDriver::new(config)?),
    };
    Ok(driver)
}
