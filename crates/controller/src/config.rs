use std::{fs, path::Path};

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

pub const SETTINGS_FILE: &str = "mojo.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Catch and log failures at the command boundary instead of
    /// propagating them.
    pub debug: bool,
    pub max_publish_depth: usize,
    pub default_hash: Option<String>,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: false,
            max_publish_depth: messaging::DEFAULT_MAX_PUBLISH_DEPTH,
            default_hash: None,
            log_filter: "info".into(),
        }
    }
}

/// Reads `mojo.toml` from the working directory when present, then applies
/// environment overrides.
pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(SETTINGS_FILE) {
        match toml::from_str::<Settings>(&raw) {
            Ok(file_cfg) => settings = file_cfg,
            Err(err) => warn!(file = SETTINGS_FILE, %err, "ignoring unreadable settings file"),
        }
    }

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings
}

pub fn load_settings_from(path: &Path) -> anyhow::Result<Settings> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
    toml::from_str(&raw)
        .with_context(|| format!("failed to parse settings file '{}'", path.display()))
}

pub fn apply_env_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("APP__DEBUG") {
        match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => settings.debug = true,
            "0" | "false" | "no" | "off" => settings.debug = false,
            _ => {}
        }
    }

    if let Some(v) = lookup("APP__MAX_PUBLISH_DEPTH") {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.max_publish_depth = parsed;
        }
    }

    if let Some(v) = lookup("APP__DEFAULT_HASH") {
        settings.default_hash = (!v.is_empty()).then_some(v);
    }

    if let Some(v) = lookup("RUST_LOG") {
        settings.log_filter = v;
    }
    if let Some(v) = lookup("APP__LOG_FILTER") {
        settings.log_filter = v;
    }
}
