use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use tracing::warn;

pub const SETTINGS_FILE: &str = "controller.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub ws_url: String,
    pub api_base_url: String,
    pub reconnect_interval_ms: u64,
    pub max_reconnect_attempts: u32,
    pub device_id: i64,
    pub default_speed: u32,
    pub default_duration_ms: u64,
    pub step_guard_ms: u64,
    pub max_messages: usize,
    pub sequence_db_url: String,
    pub command_origin: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:5500/ws".into(),
            api_base_url: "http://127.0.0.1:5500".into(),
            reconnect_interval_ms: 3000,
            max_reconnect_attempts: 5,
            device_id: 1,
            default_speed: 2,
            default_duration_ms: 1000,
            step_guard_ms: 200,
            max_messages: 100,
            sequence_db_url: "sqlite://./data/sequences.db".into(),
            command_origin: "web_interface".into(),
        }
    }
}

impl Settings {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn step_guard(&self) -> Duration {
        Duration::from_millis(self.step_guard_ms)
    }
}

/// Reads `controller.toml` from the working directory, then applies
/// `APP__*` environment overrides.
pub fn load_settings() -> Settings {
    load_settings_from(Path::new(SETTINGS_FILE), |key| std::env::var(key).ok())
}

pub fn load_settings_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => match toml::from_str::<Settings>(&raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(path = %path.display(), %err, "config: ignoring unreadable settings file");
                Settings::default()
            }
        },
        Err(_) => Settings::default(),
    };

    apply_env_overrides(&mut settings, env);
    settings.sequence_db_url = normalize_database_url(&settings.sequence_db_url);
    settings
}

fn apply_env_overrides(settings: &mut Settings, env: impl Fn(&str) -> Option<String>) {
    if let Some(v) = env("APP__WS_URL") {
        settings.ws_url = v;
    }
    if let Some(v) = env("APP__API_BASE_URL") {
        settings.api_base_url = v.trim_end_matches('/').to_string();
    }
    if let Some(v) = parsed(&env, "APP__RECONNECT_INTERVAL_MS") {
        settings.reconnect_interval_ms = v;
    }
    if let Some(v) = parsed(&env, "APP__MAX_RECONNECT_ATTEMPTS") {
        settings.max_reconnect_attempts = v;
    }
    if let Some(v) = parsed::<i64>(&env, "APP__DEVICE_ID") {
        if v > 0 {
            settings.device_id = v;
        }
    }
    if let Some(v) = parsed(&env, "APP__DEFAULT_SPEED") {
        settings.default_speed = v;
    }
    if let Some(v) = parsed(&env, "APP__DEFAULT_DURATION_MS") {
        settings.default_duration_ms = v;
    }
    if let Some(v) = parsed(&env, "APP__STEP_GUARD_MS") {
        settings.step_guard_ms = v;
    }
    if let Some(v) = parsed(&env, "APP__MAX_MESSAGES") {
        settings.max_messages = v;
    }
    if let Some(v) = env("APP__SEQUENCE_DB_URL") {
        settings.sequence_db_url = v;
    }
    if let Some(v) = env("APP__COMMAND_ORIGIN") {
        settings.command_origin = v;
    }
}

fn parsed<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "config: ignoring unparseable override");
            None
        }
    }
}

pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().sequence_db_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
