// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mapping of provider responses onto the send-failure taxonomy.

use deskline_core::ErrorKind;
use reqwest::StatusCode;

/// Fragments that identify a recipient problem in provider error text.
const RECIPIENT_HINTS: &[&str] = &[
    "not a valid whatsapp",
    "not registered",
    "invalid phone",
    "recipient",
    "does not exist",
    "not exist",
    "no lid",
    "wid error",
];

pub fn mentions_recipient(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    RECIPIENT_HINTS.iter().any(|hint| lower.contains(hint))
}

/// Classify a non-success HTTP status, using the body to spot recipient errors.
pub fn classify_status(status: StatusCode, body: &str) -> ErrorKind {
    match status.as_u16() {
        429 => ErrorKind::RateLimited,
        408 => ErrorKind::TransientProviderError,
        401 | 403 => ErrorKind::PermanentProviderError,
        400 | 404 | 422 if mentions_recipient(body) => ErrorKind::InvalidRecipient,
        s if (500..600).contains(&s) => ErrorKind::TransientProviderError,
        _ => ErrorKind::PermanentProviderError,
    }
}

/// Classify a transport failure (no HTTP response at all).
pub fn classify_transport(err: &reqwest::Error) -> ErrorKind {
    if err.is_builder() {
        ErrorKind::PermanentProviderError
    } else {
        // Timeouts, refused connections, and reset streams are all worth retrying.
        ErrorKind::TransientProviderError
    }
}

/// Meta Graph API error codes with a known meaning.
pub fn classify_cloud_code(code: i64) -> Option<ErrorKind> {
    match code {
        131026 => Some(ErrorKind::InvalidRecipient),
        130429 | 131048 | 131056 | 4 | 80007 => Some(ErrorKind::RateLimited),
        131000 | 131016 | 2 => Some(ErrorKind::TransientProviderError),
        131047 | 131050 | 131051 | 190 | 100 | 10 | 200 => {
            Some(ErrorKind::PermanentProviderError)
        }
        _ => None,
    }
}

/// Classify an application-level failure reported inside a 2xx body.
pub fn classify_soft_failure(text: &str) -> ErrorKind {
    if mentions_recipient(text) {
        ErrorKind::InvalidRecipient
    } else {
        ErrorKind::TransientProviderError
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classes() {
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS, ""), ErrorKind::RateLimited);
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED, ""), ErrorKind::PermanentProviderError);
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY, ""), ErrorKind::TransientProviderError);
        assert_eq!(classify_status(StatusCode::REQUEST_TIMEOUT, ""), ErrorKind::TransientProviderError);
        assert_eq!(classify_status(StatusCode::BAD_REQUEST, "bad json"), ErrorKind::PermanentProviderError);
        assert_eq!(
            classify_status(StatusCode::BAD_REQUEST, "Phone number is not registered"),
            ErrorKind::InvalidRecipient
        );
    }

    #[test]
    fn cloud_codes() {
        assert_eq!(classify_cloud_code(131026), Some(ErrorKind::InvalidRecipient));
        assert_eq!(classify_cloud_code(130429), Some(ErrorKind::RateLimited));
        assert_eq!(classify_cloud_code(190), Some(ErrorKind::PermanentProviderError));
        assert_eq!(classify_cloud_code(131000), Some(ErrorKind::TransientProviderError));
        assert_eq!(classify_cloud_code(999_999), None);
    }

    #[test]
    fn soft_failures() {
        assert_eq!(classify_soft_failure("No LID for user"), ErrorKind::InvalidRecipient);
        assert_eq!(classify_soft_failure("session not connected"), ErrorKind::TransientProviderError);
    }
}
