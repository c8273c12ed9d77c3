// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Semantic checks that serde attributes cannot express.
//!
//! All problems are collected before returning so the operator sees every
//! mistake in one run.

use crate::diagnostic::ConfigError;
use crate::model::{DesklineConfig, ProviderKind};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

pub fn validate_config(config: &DesklineConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if !LOG_LEVELS.contains(&config.desk.log_level.as_str()) {
        errors.push(ConfigError::validation(format!(
            "desk.log_level `{}` must be one of {}",
            config.desk.log_level,
            LOG_LEVELS.join(", ")
        )));
    }

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::validation("storage.database_path must not be empty"));
    }

    validate_queue(config, &mut errors);
    validate_timing(config, &mut errors);
    validate_provider(config, &mut errors);

    if config.gateway.enabled {
        let host = config.gateway.host.trim();
        if host.is_empty() {
            errors.push(ConfigError::validation("gateway.host must not be empty"));
        } else if host.parse::<std::net::IpAddr>().is_err()
            && !host.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        {
            errors.push(ConfigError::validation(format!(
                "gateway.host `{host}` is not an IP address or hostname"
            )));
        }
        if config.gateway.process_batch_size == 0 {
            errors.push(ConfigError::validation("gateway.process_batch_size must be at least 1"));
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

fn validate_queue(config: &DesklineConfig, errors: &mut Vec<ConfigError>) {
    let queue = &config.queue;
    if queue.max_retries == 0 {
        errors.push(ConfigError::validation("queue.max_retries must be at least 1"));
    }
    if queue.retry_delays_secs.is_empty() {
        errors.push(ConfigError::validation("queue.retry_delays_secs must not be empty"));
    } else if queue.retry_delays_secs.windows(2).any(|w| w[0] > w[1]) {
        errors.push(ConfigError::validation(format!(
            "queue.retry_delays_secs must be ascending, got {:?}",
            queue.retry_delays_secs
        )));
    }
    if queue.batch_size == 0 {
        errors.push(ConfigError::validation("queue.batch_size must be at least 1"));
    }
    if queue.send_timeout_secs == 0 {
        errors.push(ConfigError::validation("queue.send_timeout_secs must be at least 1"));
    }
    if queue.worker_interval_secs == 0 {
        errors.push(ConfigError::validation("queue.worker_interval_secs must be at least 1"));
    }
    // A claim lives through the rate-limit wait and the provider call, so
    // recovery must not fire before both could have finished.
    let claim_budget = queue.send_timeout_secs.saturating_add(config.rate_limit.max_wait_secs);
    if queue.stale_sending_secs <= claim_budget {
        errors.push(ConfigError::validation(format!(
            "queue.stale_sending_secs ({}) must exceed queue.send_timeout_secs + rate_limit.max_wait_secs ({claim_budget})",
            queue.stale_sending_secs
        )));
    }
}

fn validate_timing(config: &DesklineConfig, errors: &mut Vec<ConfigError>) {
    if config.rate_limit.max_per_window == 0 {
        errors.push(ConfigError::validation("rate_limit.max_per_window must be at least 1"));
    }
    if config.rate_limit.window_secs == 0 {
        errors.push(ConfigError::validation("rate_limit.window_secs must be at least 1"));
    }
    if config.delay.threshold_secs == 0 {
        errors.push(ConfigError::validation("delay.threshold_secs must be at least 1"));
    }
    if config.delay.sweep_interval_secs == 0 {
        errors.push(ConfigError::validation("delay.sweep_interval_secs must be at least 1"));
    }
    if config.assignment.default_max_capacity == 0 {
        errors.push(ConfigError::validation(
            "assignment.default_max_capacity must be at least 1",
        ));
    }
    let prefix = &config.inbound.placeholder_prefix;
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        errors.push(ConfigError::validation(format!(
            "inbound.placeholder_prefix `{prefix}` must be a non-empty digit string"
        )));
    }
}

fn validate_provider(config: &DesklineConfig, errors: &mut Vec<ConfigError>) {
    let provider = &config.provider;
    let code = &provider.default_country_code;
    if code.is_empty() || !code.bytes().all(|b| b.is_ascii_digit()) {
        errors.push(ConfigError::validation(format!(
            "provider.default_country_code `{code}` must be digits only"
        )));
    }
    if provider.timeout_secs == 0 {
        errors.push(ConfigError::validation("provider.timeout_secs must be at least 1"));
    }

    let missing = |value: &Option<String>| value.as_deref().is_none_or(|v| v.trim().is_empty());

    match provider.driver {
        ProviderKind::Wppconnect => {
            if provider.wppconnect.base_url.trim().is_empty() {
                errors.push(ConfigError::validation(
                    "provider.wppconnect.base_url must not be empty",
                ));
            }
        }
        ProviderKind::CloudApi => {
            if missing(&provider.cloud_api.access_token) {
                errors.push(ConfigError::validation(
                    "provider.cloud_api.access_token is required for the cloud_api driver",
                ));
            }
            if missing(&provider.cloud_api.phone_number_id) {
                errors.push(ConfigError::validation(
                    "provider.cloud_api.phone_number_id is required for the cloud_api driver",
                ));
            }
        }
        ProviderKind::Elmujib => {
            if missing(&provider.elmujib.vendor_uid) {
                errors.push(ConfigError::validation(
                    "provider.elmujib.vendor_uid is required for the elmujib driver",
                ));
            }
            if missing(&provider.elmujib.bearer_token) {
                errors.push(ConfigError::validation(
                    "provider.elmujib.bearer_token is required for the elmujib driver",
                ));
            }
        }
    }
}
