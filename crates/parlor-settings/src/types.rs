//! Settings schema with compiled defaults.

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParlorSettings {
    /// Schema version.
    pub version: String,
    /// HTTP/WebSocket server settings.
    pub server: ServerSettings,
    /// Storage settings.
    pub storage: StorageSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

impl Default for ParlorSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".into(),
            server: ServerSettings::default(),
            storage: StorageSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Bind address and CORS settings for the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Allowed CORS origins; empty means any.
    pub cors_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8010,
            cors_origins: Vec::new(),
        }
    }
}

/// Database location.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// SQLite database path. `:memory:` is accepted for ephemeral runs.
    pub db_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: "~/.parlor/parlor.db".into(),
        }
    }
}

/// Log verbosity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level for parlor crates when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_shipped_config() {
        let settings = ParlorSettings::default();
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 8010);
        assert_eq!(settings.storage.db_path, "~/.parlor/parlor.db");
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let settings: ParlorSettings =
            serde_json::from_str(r#"{"server": {"port": 9000}}"#).unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.logging.level, "info");
    }
}
