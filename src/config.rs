//! Configuration file handling for aproj.
//!
//! Loads settings from `~/.config/aproj/aproj.toml` or `./aproj.toml`.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::archive::container::DEFAULT_COMPRESSION;
use crate::archive::{LoadOptions, SaveOptions};
use crate::editor::history::DEFAULT_HISTORY_LIMIT;

/// Settings loaded from aproj.toml.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Gzip level for saved archives (0-9).
    pub compression: u32,
    /// Undo depth of histories created on load.
    pub history_limit: usize,
    /// Where copied external files are extracted on load.
    pub extract_dir: Option<PathBuf>,
    /// Fixed salt for minted IDs. A fresh one is chosen per session if unset.
    pub id_salt: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            compression: DEFAULT_COMPRESSION,
            history_limit: DEFAULT_HISTORY_LIMIT,
            extract_dir: None,
            id_salt: None,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found.
    ///
    /// Search order:
    /// 1. `./aproj.toml` (current directory)
    /// 2. `~/.config/aproj/aproj.toml` (XDG config)
    ///
    /// Returns `(config, was_file_loaded)` tuple.
    pub fn load() -> (Self, bool) {
        if let Some(config) = Self::load_from_path(&PathBuf::from("aproj.toml")) {
            return (config, true);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("aproj").join("aproj.toml");
            if let Some(config) = Self::load_from_path(&config_path) {
                return (config, true);
            }
        }

        (Self::default(), false)
    }

    /// Load configuration from a specific path.
    fn load_from_path(path: &PathBuf) -> Option<Self> {
        let content = fs::read_to_string(path).ok()?;
        toml::from_str(&content).ok()
    }

    pub fn load_options(&self, skip: HashSet<String>) -> LoadOptions {
        LoadOptions {
            skip,
            extract_dir: self.extract_dir.clone(),
            history_limit: Some(self.history_limit),
            ..LoadOptions::default()
        }
    }

    pub fn save_options(&self, skip: HashSet<String>) -> SaveOptions {
        SaveOptions {
            compression: Some(self.compression.min(9)),
            skip,
            id_salt: self.id_salt.clone(),
            ..SaveOptions::default()
        }
    }
}
