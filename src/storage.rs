//! Storage layer for taskcal
//!
//! Everything lives in one data directory:
//!
//! ```text
//! <dir>/
//!   .taskcal.toml              # Configuration
//!   taskcal.workbook.json      # Tasks plus auxiliary tables
//!   taskcal.workbook.json.lock # Advisory lock for workbook writes
//!   taskcal.calendar.json      # Events of the bundled local calendar
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::config::{Config, CONFIG_FILE};
use crate::error::Result;
use crate::lock::{self, FileLock, DEFAULT_LOCK_TIMEOUT_MS};

/// Storage manager for the taskcal data directory
#[derive(Debug, Clone)]
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    pub fn workbook_file(&self, config: &Config) -> PathBuf {
        config.workbook_path(&self.dir)
    }

    pub fn calendar_file(&self, config: &Config) -> PathBuf {
        config.calendar_path(&self.dir)
    }

    /// Read JSON data from a file
    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Read JSON data, falling back to `T::default()` when the file is absent
    pub fn read_json_or_default<T: DeserializeOwned + Default>(&self, path: &Path) -> Result<T> {
        if !path.exists() {
            return Ok(T::default());
        }
        self.read_json(path)
    }

    /// Write JSON atomically while holding the file's advisory lock
    pub fn write_json_locked<T: Serialize>(&self, path: &Path, data: &T) -> Result<()> {
        let _lock = FileLock::acquire(lock::lock_path_for(path), DEFAULT_LOCK_TIMEOUT_MS)?;
        let json = serde_json::to_string_pretty(data)?;
        lock::write_atomic(path, json.as_bytes())
    }
}
