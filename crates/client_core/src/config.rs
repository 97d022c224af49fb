use std::{fs, path::Path, str::FromStr};

use anyhow::Context;
use chrono::TimeDelta;
use serde::Deserialize;
use tracing::warn;

use crate::condense::{CondensePolicy, DEFAULT_CONDENSE_THRESHOLD_SECS};

pub const SETTINGS_FILE: &str = "message_view.toml";
const MAX_FETCH_LIMIT: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ViewSettings {
    /// Retention ceiling: rows kept in memory for the active channel.
    pub retention: usize,
    pub fetch_limit: u32,
    pub condense_threshold_secs: i64,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            retention: 50,
            fetch_limit: 50,
            condense_threshold_secs: DEFAULT_CONDENSE_THRESHOLD_SECS,
        }
    }
}

impl ViewSettings {
    pub fn condense_policy(&self) -> CondensePolicy {
        CondensePolicy::new(TimeDelta::seconds(self.condense_threshold_secs))
    }

    fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.retention == 0 {
            self.retention = defaults.retention;
        }
        if self.fetch_limit == 0 {
            self.fetch_limit = defaults.fetch_limit;
        }
        self.fetch_limit = self.fetch_limit.min(MAX_FETCH_LIMIT);
        if self.condense_threshold_secs < 0 {
            self.condense_threshold_secs = defaults.condense_threshold_secs;
        }
        self
    }
}

pub fn load_settings() -> ViewSettings {
    load_settings_from(Path::new(SETTINGS_FILE), |key| std::env::var(key).ok())
}

/// Defaults, then the TOML file if it parses, then `APP__*` environment overrides.
pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> ViewSettings {
    let mut settings = ViewSettings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match parse_settings(&raw) {
            Ok(parsed) => settings = parsed,
            Err(err) => warn!(path = %path.display(), error = %err, "config: ignoring settings file"),
        }
    }

    if let Some(v) = parsed_env(&env, "APP__MESSAGE_RETENTION") {
        settings.retention = v;
    }
    if let Some(v) = parsed_env(&env, "APP__FETCH_LIMIT") {
        settings.fetch_limit = v;
    }
    if let Some(v) = parsed_env(&env, "APP__CONDENSE_THRESHOLD_SECS") {
        settings.condense_threshold_secs = v;
    }

    settings.sanitized()
}

pub fn parse_settings(raw: &str) -> anyhow::Result<ViewSettings> {
    let settings: ViewSettings =
        toml::from_str(raw).context("failed to parse message view settings")?;
    Ok(settings.sanitized())
}

fn parsed_env<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    env(key).and_then(|v| v.trim().parse::<T>().ok())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
