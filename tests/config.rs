use std::time::Duration;

use assert_matches::assert_matches;

use kira_sample_fetch::config::{
    Config, ConfigLoader, ConfigOverrides, DataStoreEntry, DataStoreEntryObject,
};
use kira_sample_fetch::error::KiraError;

fn base_config() -> Config {
    Config {
        server_url: Some("https://lims.example.org".to_string()),
        logs_dir: Some("/tmp/kira-sf-logs".to_string()),
        ..Config::default()
    }
}

#[test]
fn parse_config_file_with_mixed_stores() {
    let json = r#"{
        "schema_version": 1,
        "server_url": "https://lims.example.org",
        "datastores": [
            "https://dss1.example.org",
            { "name": "archive", "url": "https://dss2.example.org/prefix/" }
        ],
        "max_attempts": 5,
        "trust_sidecar": true,
        "progress_interval_ms": 250,
        "logs_dir": "/tmp/kira-sf-logs"
    }"#;
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("kira-sf.json");
    std::fs::write(&path, json).unwrap();

    let resolved = ConfigLoader::resolve(path.to_str(), ConfigOverrides::default()).unwrap();
    assert_eq!(resolved.datastores.len(), 2);
    assert_eq!(resolved.datastores[0].name, "store-1");
    assert_eq!(resolved.datastores[1].name, "archive");
    assert_eq!(resolved.datastores[1].url.path(), "/prefix/");
    assert_eq!(resolved.max_attempts, 5);
    assert!(resolved.trust_sidecar);
    assert_eq!(resolved.progress_interval, Duration::from_millis(250));
}

#[test]
fn overrides_win_over_file() {
    let config = Config {
        datastores: vec![DataStoreEntry::Detailed(DataStoreEntryObject {
            name: Some("file-store".to_string()),
            url: "https://dss1.example.org".to_string(),
        })],
        max_attempts: Some(4),
        ..base_config()
    };
    let overrides = ConfigOverrides {
        server_url: Some("http://localhost:8443".to_string()),
        datastores: vec!["http://localhost:8444".to_string()],
        max_attempts: Some(1),
        buffer_size: Some(1024),
        ..ConfigOverrides::default()
    };

    let resolved = ConfigLoader::resolve_config(config, overrides).unwrap();
    assert_eq!(resolved.server_url.as_str(), "http://localhost:8443/");
    assert_eq!(resolved.datastores.len(), 1);
    assert_eq!(resolved.datastores[0].url.port(), Some(8444));
    assert_eq!(resolved.max_attempts, 1);
    assert_eq!(resolved.buffer_size, 1024);
}

#[test]
fn missing_server_is_configuration_error() {
    let err = ConfigLoader::resolve_config(Config::default(), ConfigOverrides::default())
        .unwrap_err();
    assert_matches!(err, KiraError::MissingServer);
}

#[test]
fn zero_attempts_rejected() {
    let overrides = ConfigOverrides {
        max_attempts: Some(0),
        ..ConfigOverrides::default()
    };
    let err = ConfigLoader::resolve_config(base_config(), overrides).unwrap_err();
    assert_matches!(err, KiraError::InvalidConfig(_));
}

#[test]
fn zero_buffer_rejected() {
    let config = Config {
        buffer_size: Some(0),
        ..base_config()
    };
    let err = ConfigLoader::resolve_config(config, ConfigOverrides::default()).unwrap_err();
    assert_matches!(err, KiraError::InvalidConfig(_));
}

#[test]
fn non_http_url_rejected() {
    let config = Config {
        server_url: Some("ftp://lims.example.org".to_string()),
        ..base_config()
    };
    let err = ConfigLoader::resolve_config(config, ConfigOverrides::default()).unwrap_err();
    assert_matches!(err, KiraError::InvalidConfig(_));
}

#[test]
fn explicit_missing_file_is_read_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    let err = ConfigLoader::load(path.to_str()).unwrap_err();
    assert_matches!(err, KiraError::ConfigRead(_));
}

#[test]
fn malformed_file_is_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("kira-sf.json");
    std::fs::write(&path, "{ not json").unwrap();
    let err = ConfigLoader::load(path.to_str()).unwrap_err();
    assert_matches!(err, KiraError::ConfigParse(_));
}
