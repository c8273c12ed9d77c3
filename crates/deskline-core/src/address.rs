// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel-address validation.
//!
//! Customers are reached either by a phone number or by a provider address of
//! the form `digits@domain`. Some inbound contacts only expose an opaque linked
//! id (`digits@lid`) which few providers can route to.

use thiserror::Error;

/// Domains accepted after the `@` of a qualified address.
pub const KNOWN_DOMAINS: &[&str] = &["c.us", "s.whatsapp.net", "lid"];

/// Opaque linked ids are 14 or 15 digits long.
const OPAQUE_ID_LEN: std::ops::RangeInclusive<usize> = 14..=15;
/// International numbers without the local country code.
const PLAIN_PHONE_LEN: std::ops::RangeInclusive<usize> = 10..=13;
const MIN_PHONE_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,
    #[error("address contains non-digit characters")]
    NonDigit,
    #[error("unknown address domain: {0}")]
    UnknownDomain(String),
    #[error("phone number has implausible length {0}")]
    BadLength(usize),
}

/// A validated customer address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelAddress {
    /// Digits only, as stored on the customer.
    Phone(String),
    /// `digits@c.us` or `digits@s.whatsapp.net`.
    Qualified(String),
    /// `digits@lid`: only some providers can deliver to it.
    Opaque(String),
}

impl ChannelAddress {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Phone(s) | Self::Qualified(s) | Self::Opaque(s) => s,
        }
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self, Self::Opaque(_))
    }
}

/// Validate and classify a raw customer address.
pub fn classify_address(raw: &str, country_code: &str) -> Result<ChannelAddress, AddressError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AddressError::Empty);
    }

    if let Some((local, domain)) = raw.split_once('@') {
        if local.is_empty() {
            return Err(AddressError::Empty);
        }
        if !local.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AddressError::NonDigit);
        }
        let domain = domain.to_ascii_lowercase();
        if !KNOWN_DOMAINS.contains(&domain.as_str()) {
            return Err(AddressError::UnknownDomain(domain));
        }
        let normalized = format!("{local}@{domain}");
        return Ok(if domain == "lid" {
            ChannelAddress::Opaque(normalized)
        } else {
            ChannelAddress::Qualified(normalized)
        });
    }

    let digits: String = raw
        .chars()
        .filter(|c| !matches!(c, '+' | ' ' | '-'))
        .collect();
    if digits.is_empty() {
        return Err(AddressError::Empty);
    }
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AddressError::NonDigit);
    }

    let len = digits.len();
    if OPAQUE_ID_LEN.contains(&len) {
        return Ok(ChannelAddress::Opaque(format!("{digits}@lid")));
    }
    if len < MIN_PHONE_LEN {
        return Err(AddressError::BadLength(len));
    }
    if digits.starts_with(country_code) || PLAIN_PHONE_LEN.contains(&len) {
        return Ok(ChannelAddress::Phone(digits));
    }
    Err(AddressError::BadLength(len))
}

/// Placeholder phones are minted for contacts known only by an opaque id.
pub fn is_placeholder_phone(phone: &str, prefix: &str) -> bool {
    !prefix.is_empty() && phone.starts_with(prefix)
}
