//! Configuration for the `snapdiff` binary.
//!
//! Loaded from `--config <path>` or `$XDG_CONFIG_HOME/snapdiff/config.toml`
//! when present. Command-line flags override file values.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One `A|C|D /path` line per change
    #[default]
    Text,
    /// JSON array of `{ "path", "kind" }`
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Binary invoked for `btrfs send`
    #[serde(default = "default_btrfs_bin")]
    pub btrfs_bin: String,

    #[serde(default)]
    pub format: OutputFormat,

    /// Colour text output when writing to a terminal
    #[serde(default = "default_color")]
    pub color: bool,
}

fn default_btrfs_bin() -> String {
    "btrfs".to_string()
}

fn default_color() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            btrfs_bin: default_btrfs_bin(),
            format: OutputFormat::default(),
            color: default_color(),
        }
    }
}

impl Config {
    /// `$XDG_CONFIG_HOME/snapdiff/config.toml`, or the platform equivalent.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("snapdiff").join("config.toml"))
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// An explicit path must exist; the default location is optional.
    pub fn load(explicit: Option<&Path>) -> ConfigResult<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }
}
