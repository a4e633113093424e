//! `retrace.toml` loading.
//!
//! ```toml
//! database_url = "postgres://localhost/music"
//! ledger_table = "retrace_migrations"
//!
//! [[apps]]
//! name = "music"
//! migrations_folder = "music/migrations"
//!
//! [[apps]]
//! name = "shop"
//! migrations_folder = "shop/migrations"
//! depends_on = ["music"]
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::apps::{self, AppConfig};
use crate::error::{MigrateError, Result};
use crate::ledger::DEFAULT_LEDGER_TABLE;

pub const CONFIG_FILE_NAME: &str = "retrace.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_ledger_table")]
    pub ledger_table: String,
    #[serde(default)]
    pub apps: Vec<AppConfig>,
}

fn default_ledger_table() -> String {
    DEFAULT_LEDGER_TABLE.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            ledger_table: default_ledger_table(),
            apps: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| MigrateError::Config(e.to_string()))
    }

    /// Read a config file. Relative migration folders are resolved against
    /// the file's directory.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| {
                MigrateError::Config(format!("Failed to read {}: {}", path.display(), e))
            })?;
        let mut config = Self::from_toml(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_folders(base);
        }
        Ok(config)
    }

    /// Load from `explicit`, else the first file found by [`Config::discover`].
    pub fn load(explicit: Option<&Path>) -> Result<(Self, PathBuf)> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => Self::discover().ok_or_else(|| {
                MigrateError::Config(format!(
                    "No {} found in the current directory or the user config directory",
                    CONFIG_FILE_NAME
                ))
            })?,
        };
        tracing::debug!(path = %path.display(), "loading config");
        Ok((Self::from_file(&path)?, path))
    }

    /// `./retrace.toml`, then `<config dir>/retrace/config.toml`.
    pub fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.is_file() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|dir| dir.join("retrace").join("config.toml"))
            .filter(|p| p.is_file())
    }

    fn resolve_folders(&mut self, base: &Path) {
        for app in &mut self.apps {
            if app.migrations_folder.is_relative() {
                app.migrations_folder = base.join(&app.migrations_folder);
            }
        }
    }

    pub fn app(&self, name: &str) -> Result<&AppConfig> {
        self.apps
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| MigrateError::UnknownApp(name.to_string()))
    }

    pub fn sorted_app_names(&self) -> Result<Vec<String>> {
        apps::sorted_app_names(&self.apps)
    }

    /// Connection URL, with `override_url` taking precedence.
    pub fn database_url(&self, override_url: Option<&str>) -> Result<String> {
        override_url
            .map(str::to_string)
            .or_else(|| self.database_url.clone())
            .ok_or_else(|| {
                MigrateError::Config("No database_url configured (set RETRACE_DATABASE_URL)".into())
            })
    }
}
