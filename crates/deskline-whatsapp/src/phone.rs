// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Phone number normalisation shared by the drivers.

/// Strip separators and make sure the number carries `country_code`.
///
/// A leading trunk `0` is replaced by the country code.
pub fn normalize_phone(raw: &str, country_code: &str) -> String {
    let digits: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '+' | ' ' | '-'))
        .collect();

    let digits = match digits.strip_prefix('0') {
        Some(rest) => format!("{country_code}{rest}"),
        None => digits,
    };

    if digits.starts_with(country_code) {
        digits
    } else {
        format!("{country_code}{digits}")
    }
}

/// Drop a `@c.us` / `@s.whatsapp.net` suffix, leaving the digits.
pub(crate) fn strip_domain(address: &str) -> &str {
    address.split_once('@').map_or(address, |(local, _)| local)
}

/// Whether the address is an opaque linked id that carries no phone number.
pub(crate) fn is_opaque_id(address: &str) -> bool {
    address
        .rsplit_once('@')
        .is_some_and(|(_, domain)| domain.eq_ignore_ascii_case("lid"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn local_and_international_forms() {
        assert_eq!(normalize_phone("01001234567", "20"), "201001234567");
        assert_eq!(normalize_phone("+20 100-123-4567", "20"), "201001234567");
        assert_eq!(normalize_phone("1001234567", "20"), "201001234567");
        assert_eq!(normalize_phone("201001234567", "20"), "201001234567");
        assert_eq!(normalize_phone("0501234567", "966"), "966501234567");
    }

    #[test]
    fn domains() {
        assert_eq!(strip_domain("201001234567@c.us"), "201001234567");
        assert_eq!(strip_domain("201001234567"), "201001234567");
        assert!(is_opaque_id("123456789012345@lid"));
        assert!(!is_opaque_id("201001234567@c.us"));
    }

    proptest! {
        #[test]
        fn normalisation_is_idempotent(raw in "[0-9+ -]{1,16}") {
            let once = normalize_phone(&raw, "20");
            prop_assert_eq!(normalize_phone(&once, "20"), once.clone());
            prop_assert!(once.starts_with("20"));
        }
    }
}
