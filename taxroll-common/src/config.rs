//! Configuration loading
//!
//! Settings resolve with the same priority order everywhere:
//! 1. Command-line argument (highest; clap folds env vars into this layer)
//! 2. TOML config file
//! 3. Compiled default
//!
//! The binary passes its clap-resolved values in; this module only merges
//! the file and defaults underneath them.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Default bind address when nothing else supplies one
pub const DEFAULT_BIND: &str = "127.0.0.1:8463";

/// Optional TOML config file shape
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub database_url: Option<String>,
    pub bind: Option<String>,
    #[serde(default)]
    pub import: ImportFileConfig,
}

/// `[import]` section of the config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImportFileConfig {
    pub dedupe_on_taxpayer: Option<bool>,
}

/// Fully-resolved runtime settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub bind: String,
    /// Bulk-import duplicate detection additionally keys on the normalized
    /// taxpayer name when true. Default false matches the historical
    /// behavior (duplicates keyed on page/sequence/enslaved name only).
    pub dedupe_on_taxpayer: bool,
}

impl Settings {
    /// Merge CLI/env values over an optional config file over defaults.
    ///
    /// `database_url` has no compiled default; resolution fails when no
    /// layer supplies it.
    pub fn resolve(
        cli_database_url: Option<String>,
        cli_bind: Option<String>,
        config_path: Option<&Path>,
    ) -> Result<Settings> {
        let file = match config_path {
            Some(path) => load_config_file(path)?,
            None => default_config_path()
                .filter(|p| p.exists())
                .map(|p| load_config_file(&p))
                .transpose()?
                .unwrap_or_default(),
        };

        let database_url = cli_database_url
            .or(file.database_url)
            .ok_or_else(|| {
                Error::Config(
                    "database_url is required (--database-url, DATABASE_URL, or config file)"
                        .to_string(),
                )
            })?;

        let bind = cli_bind
            .or(file.bind)
            .unwrap_or_else(|| DEFAULT_BIND.to_string());

        Ok(Settings {
            database_url,
            bind,
            dedupe_on_taxpayer: file.import.dedupe_on_taxpayer.unwrap_or(false),
        })
    }
}

/// Parse a TOML config file. A missing explicit path is an error; an
/// unreadable or malformed file is always an error.
fn load_config_file(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Cannot read config file {}: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Invalid config file {}: {}", path.display(), e)))
}

/// Platform config file location: `<config dir>/taxroll/config.toml`
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("taxroll").join("config.toml"))
}
