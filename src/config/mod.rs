//! Configuration module
//!
//! Run configuration and device-under-test defaults

mod runner;
mod settings;

pub use runner::{
    BatchPolicy, CommandSpec, Credentials, LineEnding, LinuxCheck, RunnerConfig, SerialSettings,
    SshSettings, TransportMode, DEFAULT_SCAN_GLOBS,
};
pub use settings::{build_prompt_regex, ConfigError, TargetDefaults, ENV_PREFIX, TARGET_FILE};

use directories::ProjectDirs;
use std::path::PathBuf;

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "termrunner", "Termrunner").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the application data directory
pub fn data_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "termrunner", "Termrunner").map(|dirs| dirs.data_dir().to_path_buf())
}

/// Get the default log directory
pub fn log_dir() -> Option<PathBuf> {
    data_dir().map(|d| d.join("logs"))
}
