//! Bridge configuration loaded from TOML

use crate::errors::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub closure: ClosureConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Convert native panics to error values at the boundary
    #[serde(default = "default_true")]
    pub catch_panics: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosureConfig {
    /// Maximum depth of nested simple calls accepted at capture time
    #[serde(default = "default_max_nesting")]
    pub max_nesting: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_level")]
    pub level: String,

    /// Output format: "pretty", "compact", or "json"
    #[serde(default = "default_format")]
    pub format: String,

    /// Custom filter directives (e.g. "pylon=debug")
    #[serde(default)]
    pub filter: Option<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { catch_panics: true }
    }
}

impl Default for ClosureConfig {
    fn default() -> Self {
        Self { max_nesting: default_max_nesting() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
            filter: None,
        }
    }
}

impl BridgeConfig {
    pub fn from_str(text: &str) -> BridgeResult<Self> {
        toml::from_str(text).map_err(|e| {
            BridgeError::registration(None, "config", format!("invalid bridge config: {}", e))
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let text = fs::read_to_string(path.as_ref()).map_err(|e| {
            BridgeError::registration(
                None,
                "config",
                format!("cannot read bridge config: {}", e),
            )
        })?;
        Self::from_str(&text)
    }
}

fn default_true() -> bool {
    true
}

fn default_max_nesting() -> usize {
    crate::closure::DEFAULT_MAX_NESTING
}

fn default_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "pretty".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert!(config.dispatch.catch_panics);
        assert_eq!(config.closure.max_nesting, 16);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_toml() {
        let config = BridgeConfig::from_str(
            r#"
            [dispatch]
            catch_panics = false

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        assert!(!config.dispatch.catch_panics);
        assert_eq!(config.closure.max_nesting, 16);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_invalid_toml_rejected() {
        assert!(BridgeConfig::from_str("dispatch = 3").is_err());
    }
}
