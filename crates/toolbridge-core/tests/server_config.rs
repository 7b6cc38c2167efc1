//! Integration tests for loading server configuration with overrides.

use std::io::Write;
use std::time::Duration;

use toolbridge_core::{BridgeError, MapEnv, apply_server_overrides, load_server_configs};

#[test]
fn test_file_then_env_overrides() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"servers": [{{"name": "notes", "command": "uvx notes-server", "cache_ttl_secs": 5}}]}}"#
    )
    .unwrap();

    let env = MapEnv::new()
        .with_var("TOOLBRIDGE_SERVER_NOTES_CACHE_TTL_SECS", "0")
        .with_var("TOOLBRIDGE_SERVER_NOTES_RATE_LIMIT", "3/1");

    let mut servers = load_server_configs(file.path()).unwrap();
    for server in &mut servers {
        apply_server_overrides(server, &env);
    }

    let notes = &servers[0];
    assert_eq!(notes.cache_ttl(), Duration::ZERO);
    assert_eq!(notes.rate_limit.map(|l| l.requests), Some(3));
    assert!(notes.validate().is_ok());
}

#[test]
fn test_invalid_json_reports_validation_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{{\"servers\": [{{\"command\": \"node\"}}]}}").unwrap();

    let err = load_server_configs(file.path()).unwrap_err();
    assert!(matches!(err, BridgeError::Validation(_)));
}
