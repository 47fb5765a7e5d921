//! Git working-time tracker CLI library.
//!
//! This crate provides the `gtt` command: configuration, filesystem watching,
//! per-project scheduling and the report/status views.

mod cli;
pub mod commands;
mod config;
pub mod driver;
pub mod watch;

pub use cli::{Cli, Commands};
pub use config::{Config, ConfigError, DEFAULT_CONFIG_FILE, RawConfig, RawRepository, Repository};
