//! Configuration file and settings resolution
//!
//! Values come from, in order of precedence: command line flags, the
//! `MPYFLASH_PORT` / `MPYFLASH_BAUD` environment variables (handled by
//! clap), the nearest `.mpyflash.toml` in the working directory or one of
//! its parents, and built-in defaults.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use mpyflash_core::config::DEFAULT_BAUD;
use mpyflash_core::DiscoveryConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::cli::Cli;

/// Name of the configuration file
pub const CONFIG_FILE_NAME: &str = ".mpyflash.toml";

/// Configuration file errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },

    /// The file is not valid TOML or has unknown keys
    #[error("Failed to parse {}: {source}", .path.display())]
    Parse {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: toml::de::Error,
    },
}

/// Contents of `.mpyflash.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub port: Option<String>,
    pub baud: Option<u32>,
    pub cache_dir: Option<PathBuf>,
    pub profile_db: Option<PathBuf>,
}

impl FileConfig {
    /// Find the nearest config file at or above `start`
    pub fn find(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(CONFIG_FILE_NAME))
            .find(|path| path.is_file())
    }

    /// Load a config file; relative paths in it are taken relative to its directory
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: FileConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(base) = path.parent() {
            for p in [&mut config.cache_dir, &mut config.profile_db].into_iter().flatten() {
                if p.is_relative() {
                    *p = base.join(&*p);
                }
            }
        }
        Ok(config)
    }

    /// Load the config file nearest to the working directory, if any
    pub fn discover() -> Result<Self, ConfigError> {
        let cwd = match std::env::current_dir() {
            Ok(cwd) => cwd,
            Err(_) => return Ok(Self::default()),
        };
        match Self::find(&cwd) {
            Some(path) => {
                log::debug!("Using configuration from {}", path.display());
                Self::load(&path)
            }
            None => Ok(Self::default()),
        }
    }
}

/// Effective settings for one invocation
#[derive(Debug, Clone)]
pub struct Settings {
    pub discovery: DiscoveryConfig,
    pub cache_dir: PathBuf,
    pub profile_db: Option<PathBuf>,
}

impl Settings {
    /// Merge command line (including environment) over the config file
    pub fn resolve(cli: &Cli, file: FileConfig) -> Self {
        let discovery = DiscoveryConfig {
            port: cli.port.clone().or(file.port),
            baud: cli.baud.or(file.baud).unwrap_or(DEFAULT_BAUD),
            probe_timeout: Duration::from_millis(cli.probe_timeout_ms),
        };

        Self {
            discovery,
            cache_dir: cli
                .cache_dir
                .clone()
                .or(file.cache_dir)
                .unwrap_or_else(default_cache_dir),
            profile_db: cli.profile_db.clone().or(file.profile_db),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    match ProjectDirs::from("", "", "mpyflash") {
        Some(dirs) => dirs.cache_dir().join("micropython"),
        None => PathBuf::from(".mpyflash-cache"),
    }
}
