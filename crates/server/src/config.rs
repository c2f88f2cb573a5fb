use std::{collections::HashMap, fs, path::Path, time::Duration};

use tracing::warn;

pub const SETTINGS_FILE: &str = "server.toml";
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_bind: String,
    pub tick_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8443".into(),
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
        }
    }
}

impl Settings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

pub fn load_settings() -> Settings {
    load_settings_from(Path::new(SETTINGS_FILE), |key| std::env::var(key).ok())
}

/// Defaults, then the settings file if it exists, then environment overrides.
pub fn load_settings_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        apply_file(&mut settings, &raw);
    }

    if let Some(v) = env("SERVER_BIND") {
        settings.server_bind = v;
    }
    if let Some(v) = env("APP__BIND_ADDR") {
        settings.server_bind = v;
    }

    if let Some(v) = env("APP__TICK_INTERVAL_MS") {
        settings.tick_interval_ms = parse_interval(&v);
    }

    settings
}

fn apply_file(settings: &mut Settings, raw: &str) {
    let file_cfg = match toml::from_str::<HashMap<String, toml::Value>>(raw) {
        Ok(file_cfg) => file_cfg,
        Err(err) => {
            warn!(%err, "ignoring malformed settings file");
            return;
        }
    };

    if let Some(v) = file_cfg.get("bind_addr").and_then(toml::Value::as_str) {
        settings.server_bind = v.to_string();
    }
    match file_cfg.get("tick_interval_ms") {
        Some(toml::Value::Integer(v)) => {
            settings.tick_interval_ms = parse_interval(&v.to_string());
        }
        Some(toml::Value::String(v)) => settings.tick_interval_ms = parse_interval(v),
        Some(other) => {
            warn!(value = %other, "tick_interval_ms must be a positive integer");
            settings.tick_interval_ms = DEFAULT_TICK_INTERVAL_MS;
        }
        None => {}
    }
}

/// Zero and anything that is not a positive integer fall back to the default.
fn parse_interval(raw: &str) -> u64 {
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => ms,
        _ => {
            warn!(raw, "invalid tick interval, using {DEFAULT_TICK_INTERVAL_MS} ms");
            DEFAULT_TICK_INTERVAL_MS
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
