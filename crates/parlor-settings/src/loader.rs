//! Settings file loading and env overrides.

use std::path::{Path, PathBuf};

use parlor_core::options::deep_merge;
use serde_json::Value;

use crate::types::ParlorSettings;

/// Settings loading failures.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// The settings file is not valid JSON, or the merged document does not
    /// match the schema.
    #[error("invalid settings: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result alias for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

/// Default settings file location: `~/.parlor/settings.json`.
#[must_use]
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    Path::new(&home).join(".parlor").join("settings.json")
}

/// Load settings from the default path with env overrides applied.
pub fn load_settings() -> Result<ParlorSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific file, deep-merged over compiled defaults,
/// then apply `PARLOR_*` env overrides. A missing file is not an error —
/// defaults (plus env) are returned.
pub fn load_settings_from_path(path: &Path) -> Result<ParlorSettings> {
    let defaults = serde_json::to_value(ParlorSettings::default())?;

    let merged = if path.is_file() {
        let raw = std::fs::read_to_string(path)?;
        let file_value: Value = serde_json::from_str(&raw)?;
        deep_merge(defaults, file_value)
    } else {
        defaults
    };

    let mut settings: ParlorSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Apply `PARLOR_HOST` / `PARLOR_PORT` / `PARLOR_DB_PATH` / `PARLOR_LOG_LEVEL`
/// overrides. Unparseable values are ignored with a warning.
fn apply_env_overrides(settings: &mut ParlorSettings) {
    if let Ok(host) = std::env::var("PARLOR_HOST") {
        settings.server.host = host;
    }
    if let Ok(port) = std::env::var("PARLOR_PORT") {
        match port.parse() {
            Ok(port) => settings.server.port = port,
            Err(_) => tracing::warn!(value = %port, "ignoring unparseable PARLOR_PORT"),
        }
    }
    if let Ok(db_path) = std::env::var("PARLOR_DB_PATH") {
        settings.storage.db_path = db_path;
    }
    if let Ok(level) = std::env::var("PARLOR_LOG_LEVEL") {
        settings.logging.level = level;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let settings = load_settings_from_path(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.server.port, ParlorSettings::default().server.port);
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 9123}, "logging": {"level": "debug"}}"#)
            .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.server.port, 9123);
        assert_eq!(settings.logging.level, "debug");
        // Unspecified keys keep their defaults
        assert_eq!(settings.server.host, "0.0.0.0");
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(load_settings_from_path(&path).is_err());
    }
}
