//! Config loader — reads `~/.evoclaw/config.json` and merges env vars.
//!
//! # Loading precedence
//! 1. Defaults (from `Config::default()`)
//! 2. JSON file at `~/.evoclaw/config.json`
//! 3. Environment variables `EVOCLAW_<SECTION>__<FIELD>` (override JSON)

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::schema::Config;

/// Default config file path.
pub fn get_config_path() -> PathBuf {
    crate::utils::get_data_path().join("config.json")
}

/// Load configuration from the default path + env vars.
///
/// Falls back to `Config::default()` if the file doesn't exist or can't be
/// parsed.
pub fn load_config(path: Option<&Path>) -> Config {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);
    load_config_from_path(&config_path)
}

fn load_config_from_path(path: &Path) -> Config {
    if !path.exists() {
        info!("No config file found at {}, using defaults", path.display());
        return apply_env_overrides(Config::default());
    }

    debug!("Loading config from {}", path.display());

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read config file {}: {}", path.display(), e);
            return apply_env_overrides(Config::default());
        }
    };

    let config: Config = match serde_json::from_str(&content) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to parse config JSON: {}", e);
            return apply_env_overrides(Config::default());
        }
    };

    apply_env_overrides(config)
}

/// Save configuration to disk (pretty-printed JSON with camelCase keys).
pub fn save_config(config: &Config, path: Option<&Path>) -> std::io::Result<()> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config).map_err(std::io::Error::other)?;
    std::fs::write(&config_path, json)?;
    debug!("Config saved to {}", config_path.display());
    Ok(())
}

/// Apply environment variable overrides on top of a loaded config.
///
/// Env var format: `EVOCLAW_<SECTION>__<FIELD>` (double underscore as
/// delimiter).
///
/// Supported overrides:
/// - `EVOCLAW_ROUTING__COMPLEX` / `EVOCLAW_ROUTING__SIMPLE`
/// - `EVOCLAW_PROVIDERS__<NAME>__API_KEY` / `__API_BASE`
/// - `EVOCLAW_CHANNELS__TELEGRAM__TOKEN`
/// - `EVOCLAW_CHANNELS__MQTT__HOST` / `__PORT`
fn apply_env_overrides(mut config: Config) -> Config {
    if let Ok(v) = std::env::var("EVOCLAW_ROUTING__COMPLEX") {
        config.routing.complex = v;
    }
    if let Ok(v) = std::env::var("EVOCLAW_ROUTING__SIMPLE") {
        config.routing.simple = v;
    }
    if let Ok(v) = std::env::var("EVOCLAW_CHANNELS__TELEGRAM__TOKEN") {
        config.channels.telegram.enabled = true;
        config.channels.telegram.token = v;
    }
    if let Ok(v) = std::env::var("EVOCLAW_CHANNELS__MQTT__HOST") {
        config.channels.mqtt.enabled = true;
        config.channels.mqtt.host = v;
    }
    if let Ok(v) = std::env::var("EVOCLAW_CHANNELS__MQTT__PORT") {
        match v.parse() {
            Ok(port) => config.channels.mqtt.port = port,
            Err(_) => warn!("Invalid EVOCLAW_CHANNELS__MQTT__PORT: {v}"),
        }
    }

    // Provider credentials: EVOCLAW_PROVIDERS__<NAME>__API_KEY
    for (key, value) in std::env::vars() {
        let Some(rest) = key.strip_prefix("EVOCLAW_PROVIDERS__") else {
            continue;
        };
        let Some((name, field)) = rest.split_once("__") else {
            continue;
        };
        let entry = config.providers.entry(name.to_lowercase()).or_default();
        match field {
            "API_KEY" => entry.api_key = value,
            "API_BASE" => entry.api_base = Some(value),
            _ => {}
        }
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("nope.json")));
        assert!(config.agents.is_empty());
        assert!(config.channels.terminal.enabled);
    }

    #[test]
    fn test_load_invalid_json_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let config = load_config(Some(&path));
        assert!(config.agents.is_empty());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.routing.complex = "openai/gpt-4o".into();
        config.channels.mqtt.enabled = true;

        save_config(&config, Some(&path)).unwrap();
        let reloaded = load_config(Some(&path));

        assert_eq!(reloaded.routing.complex, "openai/gpt-4o");
        assert!(reloaded.channels.mqtt.enabled);
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/config.json");
        save_config(&Config::default(), Some(&path)).unwrap();
        assert!(path.exists());
    }
}
