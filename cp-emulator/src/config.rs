//! Emulator configuration

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "CP_EMULATOR_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Serial port the CPS is connected to
    pub port: String,
    pub baud_rate: u32,
    /// Model id from the catalog
    pub model: String,
    /// Firmware name, `None` for the bare model
    pub firmware: Option<String>,
    /// Extra model catalog merged over the built-in one
    pub catalog: Option<PathBuf>,
    /// Directory receiving hex dumps
    pub output_dir: PathBuf,
    pub hex_prefix: String,
    /// Pattern document used to annotate each capture
    pub schema: Option<PathBuf>,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115200,
            model: "d878uv".to_string(),
            firmware: None,
            catalog: None,
            output_dir: PathBuf::from("captures"),
            hex_prefix: "codeplug-".to_string(),
            schema: None,
        }
    }
}

impl EmulatorConfig {
    /// Uses $XDG_CONFIG_HOME/cp-emulator, falls back to ~/.config/cp-emulator
    fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("cp-emulator"));
            }
        }
        dirs::home_dir().map(|h| h.join(".config").join("cp-emulator"))
    }

    /// Configuration file to use: the command line argument, then
    /// [`CONFIG_ENV`], then `config.json` in the config directory if present
    pub fn locate(arg: Option<PathBuf>) -> Option<PathBuf> {
        if let Some(path) = arg.or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from)) {
            return Some(path);
        }
        Self::config_dir()
            .map(|dir| dir.join("config.json"))
            .filter(|path| path.is_file())
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("Invalid config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config =
            EmulatorConfig::from_json(r#"{"port": "/dev/ttyACM0", "model": "gd77"}"#).unwrap();
        assert_eq!(config.port, "/dev/ttyACM0");
        assert_eq!(config.model, "gd77");
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.output_dir, PathBuf::from("captures"));
        assert!(config.schema.is_none());
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = EmulatorConfig {
            firmware: Some("1.03".into()),
            schema: Some(PathBuf::from("d878uv.xml")),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(EmulatorConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_locate_prefers_argument() {
        assert_eq!(
            EmulatorConfig::locate(Some("custom.json".into())),
            Some(PathBuf::from("custom.json"))
        );
    }
}
