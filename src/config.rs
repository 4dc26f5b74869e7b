//! Configuration loading and management
//!
//! Handles parsing of `.taskcal.toml` configuration files. The loaded
//! [`Config`] is built once at startup and handed to the store, the
//! reconciler and the dispatcher.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Name of the configuration file looked up in the data directory
pub const CONFIG_FILE: &str = ".taskcal.toml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// IANA timezone stamped onto new tasks
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Allowed task categories (empty allows anything)
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,

    /// Workbook file, relative to the data directory
    #[serde(default = "default_workbook")]
    pub workbook: String,

    /// Calendar collaborator configuration
    #[serde(default)]
    pub calendar: CalendarConfig,

    /// Default reminder offsets
    #[serde(default)]
    pub reminders: ReminderConfig,

    /// Task store behavior
    #[serde(default)]
    pub store: StoreConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            categories: default_categories(),
            workbook: default_workbook(),
            calendar: CalendarConfig::default(),
            reminders: ReminderConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_categories() -> Vec<String> {
    vec!["Work".to_string(), "Personal".to_string(), "Errand".to_string()]
}

fn default_workbook() -> String {
    "taskcal.workbook.json".to_string()
}

/// Calendar collaborator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// Target calendar identifier
    #[serde(default = "default_calendar_id")]
    pub calendar_id: String,

    /// Event file for the bundled local calendar
    #[serde(default = "default_calendar_path")]
    pub path: String,

    /// Upper bound for a single collaborator call
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_calendar_id() -> String {
    "primary".to_string()
}

fn default_calendar_path() -> String {
    "taskcal.calendar.json".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            calendar_id: default_calendar_id(),
            path: default_calendar_path(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl CalendarConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Reminder offsets (minutes before start) keyed by priority and category
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReminderConfig {
    #[serde(default)]
    pub priority: BTreeMap<String, Vec<u32>>,

    #[serde(default)]
    pub category: BTreeMap<String, Vec<u32>>,
}

/// Task store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Reject updates whose `_Row Version` differs from the stored one
    #[serde(default)]
    pub strict_versioning: bool,
}

impl Config {
    /// Load configuration from a `.taskcal.toml` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a data directory, or return defaults
    pub fn load_from_dir(dir: &Path) -> Self {
        let config_path = dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return Self::default();
        }
        match Self::load(&config_path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(path = %config_path.display(), error = %err, "ignoring invalid config");
                Self::default()
            }
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Workbook location inside `dir`
    pub fn workbook_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.workbook)
    }

    /// Local calendar location inside `dir`
    pub fn calendar_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.calendar.path)
    }

    /// Whether `category` is allowed by the configured list
    pub fn allows_category(&self, category: &str) -> bool {
        self.categories.is_empty()
            || self
                .categories
                .iter()
                .any(|entry| entry.eq_ignore_ascii_case(category.trim()))
    }

    fn validate(&self) -> Result<()> {
        if self.timezone.trim().is_empty() {
            return Err(Error::InvalidConfig("timezone cannot be empty".to_string()));
        }
        if self.workbook.trim().is_empty() {
            return Err(Error::InvalidConfig("workbook cannot be empty".to_string()));
        }
        if self.calendar.timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "calendar.timeout_ms must be greater than zero".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for category in &self.categories {
            let key = category.trim().to_lowercase();
            if key.is_empty() {
                return Err(Error::InvalidConfig(
                    "categories cannot contain empty entries".to_string(),
                ));
            }
            if !seen.insert(key) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate category '{category}'"
                )));
            }
        }
        Ok(())
    }
}
