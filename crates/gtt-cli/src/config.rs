//! Configuration loading and validation.
//!
//! Sources, later ones winning:
//! 1. built-in defaults
//! 2. `~/.config/gtt/config.json` (platform config dir)
//! 3. `--config <path>`, or `./config.json` when no path is given
//! 4. `GTT_*` environment variables
//!
//! The merged result is validated into a [`Config`]. Any problem is fatal:
//! the daemon never starts on a partial or ambiguous configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized};
use gtt_core::{DurationParseError, parse_duration};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Config file looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Configuration errors. All of them stop the process at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file named with `--config` does not exist.
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// A source could not be read or did not match the expected shape.
    #[error("{0}")]
    Load(#[from] Box<figment::Error>),
    /// A duration option did not parse.
    #[error("invalid {key}: {source}")]
    InvalidDuration {
        key: &'static str,
        #[source]
        source: DurationParseError,
    },
    /// A duration option was zero.
    #[error("{key} must be greater than zero")]
    ZeroDuration { key: &'static str },
    /// `file_path` was empty.
    #[error("file_path must not be empty")]
    EmptyFilePath,
    /// No repositories were configured.
    #[error("no repositories configured")]
    NoRepositories,
    /// A project name cannot be used as a store key.
    #[error("invalid project name {name:?}: {reason}")]
    InvalidProjectName { name: String, reason: &'static str },
    /// A repository entry has no path.
    #[error("repository {project:?} has no path")]
    EmptyPath { project: String },
}

/// Configuration as written in the JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawConfig {
    pub check_interval: String,
    pub debounce_interval: String,
    pub max_idle: Option<String>,
    pub write_to_file: bool,
    pub file_path: PathBuf,
    pub log_file_path: Option<PathBuf>,
    pub repositories: BTreeMap<String, RawRepository>,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            check_interval: "20m".to_string(),
            debounce_interval: "5s".to_string(),
            max_idle: None,
            write_to_file: true,
            file_path: PathBuf::from("time-tracker.txt"),
            log_file_path: None,
            repositories: BTreeMap::new(),
        }
    }
}

/// One `repositories` entry as written in the JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRepository {
    #[serde(default)]
    pub path: PathBuf,
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Validated application configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Periodic tick cadence.
    pub check_interval: Duration,
    /// Quiet window before a burst of file events counts as one activity.
    pub debounce_interval: Duration,
    /// Longest single gap credited as active time.
    pub idle_cap: Duration,
    /// When false, flushes are logged instead of written.
    pub write_to_file: bool,
    /// Duration store location.
    pub file_path: PathBuf,
    /// Log destination; stderr when unset.
    pub log_file_path: Option<PathBuf>,
    pub repositories: BTreeMap<String, Repository>,
}

/// A tracked working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub path: PathBuf,
    /// Changed paths containing any of these substrings are ignored.
    pub exclude: Vec<String>,
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(RawConfig::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Json::file(config_dir.join(DEFAULT_CONFIG_FILE)));
        }

        match config_path {
            Some(path) => {
                if !path.is_file() {
                    return Err(ConfigError::NotFound(path.to_path_buf()));
                }
                figment = figment.merge(Json::file(path));
            }
            None => figment = figment.merge(Json::file(DEFAULT_CONFIG_FILE)),
        }

        figment = figment.merge(Env::prefixed("GTT_"));

        Self::extract(&figment)
    }

    fn extract(figment: &Figment) -> Result<Self, ConfigError> {
        let raw: RawConfig = figment.extract().map_err(Box::new)?;
        Self::try_from(raw)
    }
}

impl TryFrom<RawConfig> for Config {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let check_interval = positive_duration("check_interval", &raw.check_interval)?;
        let debounce_interval = positive_duration("debounce_interval", &raw.debounce_interval)?;
        let idle_cap = match raw.max_idle.as_deref() {
            Some(value) => positive_duration("max_idle", value)?,
            None => check_interval,
        };

        if raw.file_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyFilePath);
        }
        if raw.repositories.is_empty() {
            return Err(ConfigError::NoRepositories);
        }

        let mut repositories = BTreeMap::new();
        for (name, repository) in raw.repositories {
            validate_project_name(&name)?;
            if repository.path.as_os_str().is_empty() {
                return Err(ConfigError::EmptyPath { project: name });
            }
            repositories.insert(
                name,
                Repository {
                    path: repository.path,
                    exclude: repository
                        .exclude
                        .into_iter()
                        .filter(|pattern| !pattern.is_empty())
                        .collect(),
                },
            );
        }

        Ok(Self {
            check_interval,
            debounce_interval,
            idle_cap,
            write_to_file: raw.write_to_file,
            file_path: raw.file_path,
            log_file_path: raw.log_file_path.filter(|path| !path.as_os_str().is_empty()),
            repositories,
        })
    }
}

fn positive_duration(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let duration =
        parse_duration(value).map_err(|source| ConfigError::InvalidDuration { key, source })?;
    if duration.is_zero() {
        return Err(ConfigError::ZeroDuration { key });
    }
    Ok(duration)
}

/// Project names become the first field of store records.
fn validate_project_name(name: &str) -> Result<(), ConfigError> {
    let reason = if name.trim().is_empty() {
        "name is empty"
    } else if name.contains(':') {
        "':' is reserved as the record delimiter"
    } else if name.contains('|') {
        "'|' is reserved as the record separator"
    } else if name.contains('\n') {
        "name contains a newline"
    } else {
        return Ok(());
    };

    Err(ConfigError::InvalidProjectName {
        name: name.to_string(),
        reason,
    })
}

/// Returns the platform-specific config directory for gtt.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("gtt"))
}
