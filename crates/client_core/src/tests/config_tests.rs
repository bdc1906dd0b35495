use super::*;

use std::{
    collections::HashMap,
    env, fs,
    time::{SystemTime, UNIX_EPOCH},
};

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key: &str| map.get(key).cloned()
}

fn temp_settings_path(tag: &str) -> std::path::PathBuf {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let root = env::temp_dir().join(format!("rover_controller_{tag}_{suffix}"));
    fs::create_dir_all(&root).expect("temp root");
    root.join("controller.toml")
}

#[test]
fn missing_file_yields_defaults() {
    let settings = load_settings_from(Path::new("/definitely/not/here.toml"), env_from(&[]));
    assert_eq!(settings, Settings::default());
    assert_eq!(settings.reconnect_interval(), Duration::from_millis(3000));
    assert_eq!(settings.max_reconnect_attempts, 5);
    assert_eq!(settings.step_guard(), Duration::from_millis(200));
}

#[test]
fn file_values_then_env_overrides_apply() {
    let path = temp_settings_path("file");
    fs::write(
        &path,
        r#"
ws_url = "ws://rover.local:5500/ws"
max_reconnect_attempts = 2
device_id = 4
"#,
    )
    .expect("write settings");

    let settings = load_settings_from(
        &path,
        env_from(&[
            ("APP__DEVICE_ID", "9"),
            ("APP__STEP_GUARD_MS", "250"),
            ("APP__API_BASE_URL", "http://rover.local:5500/"),
        ]),
    );

    assert_eq!(settings.ws_url, "ws://rover.local:5500/ws");
    assert_eq!(settings.max_reconnect_attempts, 2);
    assert_eq!(settings.device_id, 9);
    assert_eq!(settings.step_guard_ms, 250);
    assert_eq!(settings.api_base_url, "http://rover.local:5500");
    assert_eq!(settings.default_speed, 2);

    fs::remove_dir_all(path.parent().expect("parent")).expect("cleanup");
}

#[test]
fn unparseable_numeric_overrides_are_ignored() {
    let settings = load_settings_from(
        Path::new("/definitely/not/here.toml"),
        env_from(&[
            ("APP__RECONNECT_INTERVAL_MS", "soon"),
            ("APP__DEVICE_ID", "-3"),
        ]),
    );
    assert_eq!(settings.reconnect_interval_ms, 3000);
    assert_eq!(settings.device_id, 1);
}

#[test]
fn malformed_file_falls_back_to_defaults() {
    let path = temp_settings_path("malformed");
    fs::write(&path, "max_reconnect_attempts = \"many\"").expect("write settings");

    let settings = load_settings_from(&path, env_from(&[]));
    assert_eq!(settings, Settings::default());

    fs::remove_dir_all(path.parent().expect("parent")).expect("cleanup");
}

#[test]
fn normalizes_plain_file_path_to_sqlite_url() {
    assert_eq!(
        normalize_database_url("./data/test.db"),
        "sqlite://./data/test.db"
    );
    assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
    assert_eq!(
        normalize_database_url("  "),
        Settings::default().sequence_db_url
    );
}
