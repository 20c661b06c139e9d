//! User-configurable settings
//!
//! Every path a component needs is carried here and handed to it at
//! construction. Nothing reads process-wide fixed locations.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::platform::LaunchTemplate;
use crate::store::KeyMatch;

/// Title written for a ROM whose checksum is not in the catalog
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedTitle {
    /// Empty, so the ROM shows up for manual mapping
    #[default]
    Blank,
    /// The selected entry's file name without extension; the block then
    /// counts as mapped
    FileStem,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// OpenVGDB SQLite file. Defaults to data_directory/openvgdb.sqlite.
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
    /// Platform definition file. Defaults to data_directory/app.js.
    #[serde(default)]
    pub registry_path: Option<PathBuf>,
    /// Checksum cache. Defaults to data_directory/crc_cache.json.
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
    /// Store file name inside each ROM folder
    #[serde(default)]
    pub store_file_name: Option<String>,
    /// Launch command with `{core}` and `{file.path}` placeholders
    #[serde(default)]
    pub launch_template: Option<String>,
    #[serde(default)]
    pub unmatched_title: UnmatchedTitle,
    #[serde(default)]
    pub key_match: KeyMatch,
}

pub const DEFAULT_STORE_FILE_NAME: &str = "metadata.pegasus.txt";

impl Settings {
    /// Default settings file location
    /// - Linux: ~/.config/pegasus-meta/settings.json
    /// - macOS: ~/Library/Application Support/pegasus-meta/settings.json
    /// - Windows: %APPDATA%\pegasus-meta\config\settings.json
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("", "", "pegasus-meta")
            .map(|dirs| dirs.config_dir().join("settings.json"))
            .unwrap_or_else(|| PathBuf::from("settings.json"))
    }

    /// Load settings from a JSON file; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(json) => serde_json::from_str(&json)
                .map_err(|e| Error::Settings(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(Error::io(path, e)),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| Error::Settings(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| Error::io(path, e))
    }

    /// Base data directory
    /// - Linux: ~/.local/share/pegasus-meta
    /// - macOS: ~/Library/Application Support/pegasus-meta
    /// - Windows: %APPDATA%\pegasus-meta\data
    pub fn data_directory() -> PathBuf {
        directories::ProjectDirs::from("", "", "pegasus-meta")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn get_catalog_path(&self) -> PathBuf {
        self.catalog_path
            .clone()
            .unwrap_or_else(|| Self::data_directory().join("openvgdb.sqlite"))
    }

    pub fn get_registry_path(&self) -> PathBuf {
        self.registry_path
            .clone()
            .unwrap_or_else(|| Self::data_directory().join("app.js"))
    }

    pub fn get_cache_path(&self) -> PathBuf {
        self.cache_path
            .clone()
            .unwrap_or_else(|| Self::data_directory().join("crc_cache.json"))
    }

    pub fn store_file_name(&self) -> &str {
        self.store_file_name.as_deref().unwrap_or(DEFAULT_STORE_FILE_NAME)
    }

    pub fn store_path(&self, rom_folder: &Path) -> PathBuf {
        rom_folder.join(self.store_file_name())
    }

    pub fn launch(&self) -> LaunchTemplate {
        self.launch_template
            .as_deref()
            .map(LaunchTemplate::new)
            .unwrap_or_default()
    }
}
