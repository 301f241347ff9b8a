#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tb_engine::{ConfigError, EngineConfig};

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: BTreeMap<String, String> = vars
        .iter()
        .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn missing_keys_take_defaults() {
    let config = EngineConfig::from_toml("").expect("empty toml");
    assert_eq!(config, EngineConfig::default());
    assert_eq!(config.storage_root, PathBuf::from("./tabula-data"));
    assert_eq!(config.session_ttl_secs, 600);
    assert_eq!(config.session_default_page_size, 50);
    assert_eq!(config.session_max_page_size, 500);
    assert_eq!(config.audit_retention_max_events, 5000);
    assert_eq!(config.log_filter, "info");
}

#[test]
fn toml_values_are_clamped_into_range() {
    let config = EngineConfig::from_toml(
        r#"
storage_root = "/var/lib/tabula"
session_ttl_secs = 0
session_default_page_size = 900
session_max_page_size = 100
stream_page_size = 0
audit_retention_max_events = 5
invitation_ttl_secs = 10
log_filter = "tb_storage=debug"
"#,
    )
    .expect("parse toml");
    assert_eq!(config.storage_root, PathBuf::from("/var/lib/tabula"));
    assert_eq!(config.session_ttl_secs, 1);
    assert_eq!(config.session_max_page_size, 100);
    assert_eq!(config.session_default_page_size, 100);
    assert_eq!(config.stream_page_size, 1);
    assert_eq!(config.audit_retention_max_events, 100);
    assert_eq!(config.invitation_ttl_secs, 60);
    assert_eq!(config.log_filter, "tb_storage=debug");

    let options = config.store_options();
    assert_eq!(options.busy_timeout, Duration::from_millis(5000));
    assert_eq!(options.audit_retention, 100);

    let err = EngineConfig::from_toml("session_ttl_secs = \"soon\"").expect_err("wrong type");
    assert!(matches!(err, ConfigError::Toml(_)), "got {err:?}");
}

#[test]
fn environment_overrides_win_over_file_values() {
    let base = EngineConfig::from_toml("session_ttl_secs = 120\nlog_ansi = true").expect("toml");
    let config = base
        .with_env_overrides(lookup(&[
            ("TABULA_SESSION_TTL_SECS", " 30 "),
            ("TABULA_STORAGE_ROOT", "/tmp/tabula"),
            ("TABULA_LOG_ANSI", "off"),
            ("TABULA_STREAM_PAGE_SIZE", ""),
        ]))
        .expect("overrides");
    assert_eq!(config.session_ttl_secs, 30);
    assert_eq!(config.storage_root, PathBuf::from("/tmp/tabula"));
    assert!(!config.log_ansi);
    assert_eq!(config.stream_page_size, 200);

    let err = EngineConfig::default()
        .with_env_overrides(lookup(&[("TABULA_SESSION_MAX_PAGE_SIZE", "lots")]))
        .expect_err("not a number");
    match err {
        ConfigError::InvalidEnv { key, value } => {
            assert_eq!(key, "TABULA_SESSION_MAX_PAGE_SIZE");
            assert_eq!(value, "lots");
        }
        other => panic!("expected InvalidEnv, got {other:?}"),
    }
}

#[test]
fn config_files_load_from_disk() {
    let dir = std::env::temp_dir().join(format!(
        "tb_engine_config_files_load_from_disk_{}",
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    let path = dir.join("tabula.toml");
    std::fs::write(&path, "stream_page_size = 25\n").expect("write config");

    let config = EngineConfig::load(&path).expect("load");
    assert_eq!(config.stream_page_size, 25);

    let err = EngineConfig::load(dir.join("missing.toml")).expect_err("missing file");
    assert!(matches!(err, ConfigError::Io(_)), "got {err:?}");
}
