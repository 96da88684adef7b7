//! Target defaults
//!
//! The device-under-test record (address, account, prompt, console device)
//! shared by every run. Loaded from `target.toml`, then overlaid with
//! `TERMRUNNER_TARGET_*` environment variables.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// File name looked up in the configuration directory
pub const TARGET_FILE: &str = "target.toml";

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "TERMRUNNER_TARGET_";

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Device-under-test defaults
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetDefaults {
    /// Address used for SSH
    pub ip: Option<String>,
    /// Account name
    pub user: Option<String>,
    /// Account password
    pub password: Option<String>,
    /// Shell prompt regex; `<target_user>` is replaced by the username
    pub prompt_regex: Option<String>,
    /// Serial console device
    pub serial_device: Option<String>,
}

impl fmt::Debug for TargetDefaults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetDefaults")
            .field("ip", &self.ip)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("prompt_regex", &self.prompt_regex)
            .field("serial_device", &self.serial_device)
            .finish()
    }
}

impl TargetDefaults {
    /// Default file location
    pub fn default_path() -> Option<PathBuf> {
        super::config_dir().map(|d| d.join(TARGET_FILE))
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing default file yields empty defaults; a missing explicit file
    /// is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load_from(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Load from an explicit file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let defaults: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loaded target defaults");
        Ok(defaults.normalized())
    }

    /// Overlay values from the process environment
    #[must_use]
    pub fn with_env(self) -> Self {
        self.with_lookup(|key| std::env::var(key).ok())
    }

    /// Overlay values from `lookup`, keyed by full variable name
    #[must_use]
    pub fn with_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| {
            lookup(&format!("{ENV_PREFIX}{suffix}")).filter(|v| !v.trim().is_empty())
        };

        if let Some(v) = var("IP") {
            self.ip = Some(v);
        }
        if let Some(v) = var("USER") {
            self.user = Some(v);
        }
        if let Some(v) = var("PASSWORD") {
            self.password = Some(v);
        }
        if let Some(v) = var("PROMPT_REGEX") {
            self.prompt_regex = Some(v);
        }
        if let Some(v) = var("SERIAL_DEVICE") {
            self.serial_device = Some(v);
        }
        self.normalized()
    }

    /// Blank strings count as unset
    fn normalized(mut self) -> Self {
        for field in [
            &mut self.ip,
            &mut self.user,
            &mut self.prompt_regex,
            &mut self.serial_device,
        ] {
            if field.as_deref().is_some_and(|v| v.trim().is_empty()) {
                *field = None;
            }
        }
        if self.password.as_deref().is_some_and(str::is_empty) {
            self.password = None;
        }
        self
    }
}

/// Shell prompt regex for `username`.
///
/// A configured regex is used verbatim after replacing `<target_user>` and
/// `<username>` with the escaped username. Without one, a `user@user:...$`
/// pattern is derived from the username; without either, any `$`/`#` prompt.
pub fn build_prompt_regex(configured: Option<&str>, username: Option<&str>) -> String {
    let username = username.map(str::trim).filter(|u| !u.is_empty());

    if let Some(pattern) = configured.map(str::trim).filter(|p| !p.is_empty()) {
        return match username {
            Some(user) => {
                let escaped = regex::escape(user);
                pattern
                    .replace("<target_user>", &escaped)
                    .replace("<username>", &escaped)
            }
            None => pattern.to_string(),
        };
    }

    match username {
        Some(user) => {
            let u = regex::escape(user);
            format!(r"(?:{u}@{u}:.*[$#]|[$#]) ?$")
        }
        None => r"[$#] ?$".to_string(),
    }
}
