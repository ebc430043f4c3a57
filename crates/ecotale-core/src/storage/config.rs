//! TOML-based application configuration.
//!
//! Stores the engine's policy constants:
//! - Daily/weekly task targets and streak celebration cadence
//! - Cache and fetch TTLs
//! - Notification retention
//! - Achievement thresholds
//! - The UTC offset that defines a calendar day
//!
//! Configuration is stored at `~/.config/ecotale/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::data_dir;
use crate::achievements::AchievementPolicy;
use crate::cache::CacheConfig;
use crate::calendar::Calendar;
use crate::error::ConfigError;
use crate::fetch::FetchConfig;
use crate::notifications::NotificationConfig;
use crate::tasks::TaskPolicy;

/// Calendar configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// Minutes east of UTC where the local day starts.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/ecotale/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tasks: TaskPolicy,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub achievements: AchievementPolicy,
    #[serde(default)]
    pub calendar: CalendarConfig,
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            if is_leaf {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        if let Ok(n) = value.parse::<i64>() {
                            serde_json::Value::Number(n.into())
                        } else if let Ok(n) = value.parse::<f64>() {
                            serde_json::Number::from_f64(n)
                                .map(serde_json::Value::Number)
                                .ok_or_else(|| invalid(format!("cannot parse '{value}' as number")))?
                        } else {
                            return Err(invalid(format!("cannot parse '{value}' as number")));
                        }
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    // Unset optional values take whatever the text parses as.
                    serde_json::Value::Null => serde_json::from_str(value)
                        .unwrap_or_else(|_| serde_json::Value::String(value.into())),
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    pub fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from disk or return default.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        match std::fs::read_to_string(&path) {
            Ok(content) => Self::from_toml(&content).map_err(|e| ConfigError::LoadFailed {
                path,
                message: e.to_string(),
            }),
            Err(_) => {
                let cfg = Self::default();
                cfg.save()?;
                Ok(cfg)
            }
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Persist to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::path()?;
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.clone(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(&path, content).map_err(|e| save_failed(e.to_string()))?;
        Ok(())
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key without saving.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value does not fit the
    /// field's type.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let mut json = serde_json::to_value(&*self).map_err(|e| invalid(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json).map_err(|e| invalid(e.to_string()))?;
        Ok(())
    }

    /// Set a config value by key and save. Returns error if key is unknown.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.apply(key, value)?;
        self.save()
    }

    pub fn calendar(&self) -> Calendar {
        Calendar::with_offset_minutes(self.calendar.utc_offset_minutes)
    }

    /// Load from disk, returning default on error.
    /// This is a convenience method that never fails.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }
}
