//! JSON server configuration file.
//!
//! ```json
//! { "servers": [ { "name": "fs", "command": "npx -y @modelcontextprotocol/server-filesystem" } ] }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::ServerConfig;
use crate::error::BridgeError;

/// On-disk layout of a server configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServersFile {
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

/// Parse server configurations from JSON text.
pub fn parse_server_configs(json: &str) -> Result<Vec<ServerConfig>, BridgeError> {
    let file: ServersFile = serde_json::from_str(json)
        .map_err(|e| BridgeError::validation(format!("invalid server config file: {e}")))?;
    Ok(file.servers)
}

/// Read and parse a server configuration file.
pub fn load_server_configs(path: &Path) -> Result<Vec<ServerConfig>, BridgeError> {
    let json = std::fs::read_to_string(path).map_err(|e| {
        BridgeError::validation(format!("cannot read server config file: {}", e.kind()))
    })?;
    parse_server_configs(&json)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::domain::TransportKind;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"servers": [
                {{"name": "fs", "command": "npx -y server-fs", "auto_start": true}},
                {{"name": "search", "kind": "remote", "transport": "socket", "endpoint": "127.0.0.1:7000"}}
            ]}}"#
        )
        .unwrap();

        let servers = load_server_configs(file.path()).unwrap();
        assert_eq!(servers.len(), 2);
        assert!(servers[0].auto_start);
        assert_eq!(servers[1].transport, TransportKind::Socket);
    }

    #[test]
    fn test_missing_file_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_server_configs(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, BridgeError::Validation(_)));
        // The path itself is not echoed back.
        assert!(!err.to_string().contains("nope.json"));
    }

    #[test]
    fn test_empty_object_has_no_servers() {
        assert!(parse_server_configs("{}").unwrap().is_empty());
        assert!(parse_server_configs("[]").is_err());
    }
}
