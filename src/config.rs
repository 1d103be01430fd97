//! Configuration for Ketron Deck
//!
//! Loaded from `config.yaml`. Every section is optional and falls back to
//! the defaults below.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::info;

use crate::control::ControlKind;
use crate::dispatch::DispatchSettings;
use crate::error::ConfigError;
use crate::mapping::KEYS_PER_PAGE;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub midi: MidiConfig,
    #[serde(default = "default_key_mappings_file")]
    pub key_mappings_file: PathBuf,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub volume: VolumeConfig,
    #[serde(default)]
    pub feedback: FeedbackConfig,
    /// Non-default controls by table index (second page starts at 15)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub controls: HashMap<u32, ControlKind>,
}

/// MIDI output selection
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MidiConfig {
    /// Output port name; auto-detected when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(default = "default_client_name")]
    pub client_name: String,
}

/// Values for plain CC keys
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DispatchConfig {
    #[serde(default = "default_cc_value")]
    pub cc_value: u8,
    /// 0-based MIDI channel
    #[serde(default)]
    pub cc_channel: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct VolumeConfig {
    /// Amount applied by VOLUME UP / VOLUME DOWN keys
    #[serde(default = "default_volume_step")]
    pub step: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FeedbackConfig {
    #[serde(default = "default_flash_ms")]
    pub flash_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            midi: MidiConfig::default(),
            key_mappings_file: default_key_mappings_file(),
            dispatch: DispatchConfig::default(),
            volume: VolumeConfig::default(),
            feedback: FeedbackConfig::default(),
            controls: HashMap::new(),
        }
    }
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            port: None,
            client_name: default_client_name(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            cc_value: default_cc_value(),
            cc_channel: 0,
        }
    }
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            step: default_volume_step(),
        }
    }
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            flash_ms: default_flash_ms(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file with validation.
    ///
    /// A relative `key_mappings_file` is taken relative to the config file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let mut config = Self::from_yaml(&contents, path)?;
        if let Some(base) = path.parent() {
            config.resolve_relative_paths(base);
        }
        Ok(config)
    }

    /// Load the file if it exists, otherwise run on defaults
    pub async fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if fs::try_exists(path).await.unwrap_or(false) {
            Self::load(path).await
        } else {
            info!("No config at {}, using defaults", path.display());
            let mut config = Self::default();
            if let Some(base) = path.parent() {
                config.resolve_relative_paths(base);
            }
            Ok(config)
        }
    }

    /// Parse and validate YAML text
    pub fn from_yaml(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        // An empty file is a valid, all-defaults config
        let config: AppConfig = if contents.trim().is_empty() {
            AppConfig::default()
        } else {
            serde_yaml::from_str(contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        };

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("dispatch.cc_value", self.dispatch.cc_value.into(), 0, 127)?;
        check_range("dispatch.cc_channel", self.dispatch.cc_channel.into(), 0, 15)?;
        check_range("volume.step", self.volume.step.into(), 1, 127)?;
        check_range(
            "feedback.flash_ms",
            i64::try_from(self.feedback.flash_ms).unwrap_or(i64::MAX),
            1,
            10_000,
        )?;

        let max_index = i64::from(KEYS_PER_PAGE * 2 - 1);
        for index in self.controls.keys() {
            check_range("controls", (*index).into(), 0, max_index)?;
        }

        Ok(())
    }

    fn resolve_relative_paths(&mut self, base: &Path) {
        if self.key_mappings_file.is_relative() && !base.as_os_str().is_empty() {
            self.key_mappings_file = base.join(&self.key_mappings_file);
        }
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            cc_value: self.dispatch.cc_value,
            cc_channel: self.dispatch.cc_channel,
            volume_step: self.volume.step,
        }
    }

    pub fn flash_duration(&self) -> Duration {
        Duration::from_millis(self.feedback.flash_ms)
    }
}

fn check_range(field: &'static str, value: i64, min: i64, max: i64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidRange {
            field,
            value,
            min,
            max,
        })
    }
}

fn default_key_mappings_file() -> PathBuf { PathBuf::from("key_mappings.json") }
fn default_client_name() -> String { "Ketron-Deck".to_string() }
fn default_cc_value() -> u8 { 64 }
fn default_volume_step() -> u8 { 1 }
fn default_flash_ms() -> u64 { 100 }

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::from_yaml("", Path::new("config.yaml")).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.dispatch_settings(), DispatchSettings::default());
        assert_eq!(config.flash_duration(), Duration::from_millis(100));
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
midi:
  port: "CH345:CH345 MIDI 1 24:0"
key_mappings_file: /etc/ketron/keys.json
dispatch:
  cc_value: 127
  cc_channel: 15
volume:
  step: 5
feedback:
  flash_ms: 250
controls:
  14:
    type: text
    text: SD90
"#;
        let config = AppConfig::from_yaml(yaml, Path::new("config.yaml")).unwrap();
        assert_eq!(config.midi.port.as_deref(), Some("CH345:CH345 MIDI 1 24:0"));
        assert_eq!(config.dispatch.cc_channel, 15);
        assert_eq!(config.volume.step, 5);
        assert_eq!(config.flash_duration(), Duration::from_millis(250));
        assert!(matches!(config.controls.get(&14), Some(ControlKind::Text { .. })));
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        let err = AppConfig::from_yaml("dispatch:\n  cc_channel: 16\n", Path::new("c.yaml"))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidRange {
                field: "dispatch.cc_channel",
                value: 16,
                ..
            }
        ));

        let err = AppConfig::from_yaml("volume:\n  step: 0\n", Path::new("c.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRange { field: "volume.step", .. }));

        let err = AppConfig::from_yaml("controls:\n  30:\n    type: key_mapping\n", Path::new("c.yaml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRange { field: "controls", .. }));
    }

    #[test]
    fn test_malformed_yaml_is_parse_error() {
        let err = AppConfig::from_yaml("midi: [unclosed", Path::new("c.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_relative_mappings_path_follows_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "key_mappings_file: keys.json\n").unwrap();

        let config = AppConfig::load(&path).await.unwrap();
        assert_eq!(config.key_mappings_file, dir.path().join("keys.json"));
    }

    #[tokio::test]
    async fn test_missing_config_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::load_or_default(dir.path().join("absent.yaml"))
            .await
            .unwrap();
        assert_eq!(config.key_mappings_file, dir.path().join("key_mappings.json"));

        let err = AppConfig::load(dir.path().join("absent.yaml")).await.unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
