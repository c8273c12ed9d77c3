// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered configuration loading with Figment.
//!
//! Merge order, later wins: compiled defaults, `/etc/deskline/deskline.toml`,
//! `~/.config/deskline/deskline.toml`, `./deskline.toml`, `DESKLINE_*` env vars.

#![allow(clippy::result_large_err)] // figment::Error is external

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::DesklineConfig;

const SYSTEM_CONFIG: &str = "/etc/deskline/deskline.toml";
const LOCAL_CONFIG: &str = "deskline.toml";

/// Env key prefixes mapped to their dotted section path.
///
/// Nested sections come before their parent so `provider_cloud_api_*` is not
/// swallowed by `provider_*`.
const ENV_SECTIONS: &[(&str, &str)] = &[
    ("desk_", "desk"),
    ("storage_", "storage"),
    ("queue_", "queue"),
    ("rate_limit_", "rate_limit"),
    ("inbound_", "inbound"),
    ("delay_", "delay"),
    ("assignment_", "assignment"),
    ("provider_wppconnect_", "provider.wppconnect"),
    ("provider_cloud_api_", "provider.cloud_api"),
    ("provider_elmujib_", "provider.elmujib"),
    ("provider_", "provider"),
    ("gateway_", "gateway"),
];

/// Config files consulted by [`load_config`], lowest priority first.
pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(SYSTEM_CONFIG)];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("deskline").join("deskline.toml"));
    }
    paths.push(PathBuf::from(LOCAL_CONFIG));
    paths
}

pub fn build_figment() -> Figment {
    let mut figment = Figment::new().merge(Serialized::defaults(DesklineConfig::default()));
    for path in search_paths() {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(env_provider())
}

/// Load configuration from the standard hierarchy with env overrides.
pub fn load_config() -> Result<DesklineConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only. No files, no env.
pub fn load_config_from_str(toml_content: &str) -> Result<DesklineConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(DesklineConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load one explicit file, then apply env overrides.
pub fn load_config_from_path(path: &Path) -> Result<DesklineConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(DesklineConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Map `DESKLINE_QUEUE_MAX_RETRIES` to `queue.max_retries` and so on.
///
/// Splitting on `_` would break keys that contain underscores, so sections are
/// matched by explicit prefix instead.
fn env_provider() -> Env {
    Env::prefixed("DESKLINE_").map(|key| map_env_key(key.as_str()).into())
}

pub(crate) fn map_env_key(key: &str) -> String {
    for (prefix, section) in ENV_SECTIONS {
        if let Some(rest) = key.strip_prefix(prefix) {
            return format!("{section}.{rest}");
        }
    }
    key.to_string()
}
