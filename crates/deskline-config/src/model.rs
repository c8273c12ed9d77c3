// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs.
//!
//! All structs use `#[serde(deny_unknown_fields)]` so a misspelled key fails
//! at startup instead of silently falling back to a default.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level Deskline configuration. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DesklineConfig {
    #[serde(default)]
    pub desk: DeskConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Outbound queue and retry policy.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Provider call budget.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Inbound message handling.
    #[serde(default)]
    pub inbound: InboundConfig,

    /// Response-time tracking.
    #[serde(default)]
    pub delay: DelayConfig,

    #[serde(default)]
    pub assignment: AssignmentConfig,

    /// Upstream messaging provider.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// HTTP surface.
    #[serde(default)]
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DeskConfig {
    /// Display name used in logs.
    #[serde(default = "default_desk_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for DeskConfig {
    fn default() -> Self {
        Self {
            name: default_desk_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_desk_name() -> String {
    "deskline".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL journal mode.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: true,
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("deskline").join("deskline.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("deskline.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// Attempts before a transient failure becomes terminal.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Wait after the n-th failure, indexed by `retry_count - 1`.
    #[serde(default = "default_retry_delays")]
    pub retry_delays_secs: Vec<u64>,

    /// Messages pulled per `process_pending` call.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Upper bound for a single provider call.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,

    /// Identical outbound content within this window is a duplicate.
    #[serde(default = "default_outbound_dedup_window")]
    pub dedup_window_secs: u64,

    /// `sending` rows older than this are considered abandoned.
    #[serde(default = "default_stale_sending")]
    pub stale_sending_secs: u64,

    /// Tick interval of the built-in worker loop.
    #[serde(default = "default_worker_interval")]
    pub worker_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delays_secs: default_retry_delays(),
            batch_size: default_batch_size(),
            send_timeout_secs: default_send_timeout(),
            dedup_window_secs: default_outbound_dedup_window(),
            stale_sending_secs: default_stale_sending(),
            worker_interval_secs: default_worker_interval(),
        }
    }
}

impl QueueConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    pub fn stale_sending(&self) -> Duration {
        Duration::from_secs(self.stale_sending_secs)
    }

    pub fn worker_interval(&self) -> Duration {
        Duration::from_secs(self.worker_interval_secs)
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delays() -> Vec<u64> {
    vec![5, 30, 120]
}

fn default_batch_size() -> u32 {
    10
}

fn default_send_timeout() -> u64 {
    30
}

fn default_outbound_dedup_window() -> u64 {
    300
}

fn default_stale_sending() -> u64 {
    300
}

fn default_worker_interval() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Provider calls admitted per rolling window.
    #[serde(default = "default_max_per_window")]
    pub max_per_window: u32,

    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// How long an attempt may wait for a free slot. 0 defers immediately.
    #[serde(default)]
    pub max_wait_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_window: default_max_per_window(),
            window_secs: default_window_secs(),
            max_wait_secs: 0,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

fn default_max_per_window() -> u32 {
    20
}

fn default_window_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct InboundConfig {
    /// Content-match window used when the provider sends no message id.
    #[serde(default = "default_inbound_dedup_window")]
    pub dedup_window_secs: u64,

    /// Prefix of phones minted for contacts known only by an opaque id.
    #[serde(default = "default_placeholder_prefix")]
    pub placeholder_prefix: String,
}

impl Default for InboundConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: default_inbound_dedup_window(),
            placeholder_prefix: default_placeholder_prefix(),
        }
    }
}

impl InboundConfig {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }
}

fn default_inbound_dedup_window() -> u64 {
    10
}

fn default_placeholder_prefix() -> String {
    "201000".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DelayConfig {
    /// Silence after which a ticket counts as delayed.
    #[serde(default = "default_delay_threshold")]
    pub threshold_secs: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            threshold_secs: default_delay_threshold(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl DelayConfig {
    pub fn threshold(&self) -> Duration {
        Duration::from_secs(self.threshold_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_delay_threshold() -> u64 {
    180
}

fn default_sweep_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AssignmentConfig {
    /// Capacity given to agents created without an explicit limit.
    #[serde(default = "default_max_capacity")]
    pub default_max_capacity: u32,
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            default_max_capacity: default_max_capacity(),
        }
    }
}

fn default_max_capacity() -> u32 {
    15
}

/// Which upstream driver to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Wppconnect,
    CloudApi,
    Elmujib,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Wppconnect => "wppconnect",
            Self::CloudApi => "cloud_api",
            Self::Elmujib => "elmujib",
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    #[serde(default)]
    pub driver: ProviderKind,

    /// Prepended to local numbers during normalisation.
    #[serde(default = "default_country_code")]
    pub default_country_code: String,

    /// HTTP client timeout for provider calls.
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub wppconnect: WppconnectConfig,

    #[serde(default)]
    pub cloud_api: CloudApiConfig,

    #[serde(default)]
    pub elmujib: ElmujibConfig,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            driver: ProviderKind::default(),
            default_country_code: default_country_code(),
            timeout_secs: default_provider_timeout(),
            wppconnect: WppconnectConfig::default(),
            cloud_api: CloudApiConfig::default(),
            elmujib: ElmujibConfig::default(),
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_country_code() -> String {
    "20".to_string()
}

fn default_provider_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WppconnectConfig {
    #[serde(default = "default_wppconnect_url")]
    pub base_url: String,

    /// Sent as `X-API-Key` when set.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for WppconnectConfig {
    fn default() -> Self {
        Self {
            base_url: default_wppconnect_url(),
            api_key: None,
        }
    }
}

fn default_wppconnect_url() -> String {
    "http://localhost:3000".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CloudApiConfig {
    #[serde(default)]
    pub access_token: Option<String>,

    #[serde(default)]
    pub phone_number_id: Option<String>,

    #[serde(default = "default_cloud_api_version")]
    pub api_version: String,

    #[serde(default = "default_cloud_api_url")]
    pub base_url: String,
}

impl Default for CloudApiConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            phone_number_id: None,
            api_version: default_cloud_api_version(),
            base_url: default_cloud_api_url(),
        }
    }
}

fn default_cloud_api_version() -> String {
    "v18.0".to_string()
}

fn default_cloud_api_url() -> String {
    "https://graph.facebook.com".to_string()
}

/// Where the Elmujib token travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ElmujibAuth {
    #[default]
    Header,
    Query,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ElmujibConfig {
    #[serde(default = "default_elmujib_url")]
    pub base_url: String,

    #[serde(default)]
    pub vendor_uid: Option<String>,

    #[serde(default)]
    pub bearer_token: Option<String>,

    /// Sender number id, for vendors with several numbers.
    #[serde(default)]
    pub from_phone_number_id: Option<String>,

    #[serde(default)]
    pub auth_method: ElmujibAuth,
}

impl Default for ElmujibConfig {
    fn default() -> Self {
        Self {
            base_url: default_elmujib_url(),
            vendor_uid: None,
            bearer_token: None,
            from_phone_number_id: None,
            auth_method: ElmujibAuth::default(),
        }
    }
}

fn default_elmujib_url() -> String {
    "https://elmujib.com/api".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_gateway_host")]
    pub host: String,

    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Run a small `process_pending` batch right after each enqueue.
    #[serde(default = "default_true")]
    pub process_after_enqueue: bool,

    #[serde(default = "default_process_batch")]
    pub process_batch_size: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_gateway_host(),
            port: default_gateway_port(),
            process_after_enqueue: true,
            process_batch_size: default_process_batch(),
        }
    }
}

fn default_gateway_host() -> String {
    "127.0.0.1".to_string()
}

fn default_gateway_port() -> u16 {
    8090
}

fn default_process_batch() -> u32 {
    5
}
