//! Run configuration
//!
//! Everything one run needs, resolved up front and immutable afterwards.

use crate::core::error::RunError;
use crate::core::matcher::compile;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default serial device patterns scanned during auto-discovery
pub const DEFAULT_SCAN_GLOBS: [&str; 2] = ["/dev/ttyUSB*", "/dev/ttyACM*"];

/// Transport preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// SSH first, serial fallback
    #[default]
    Auto,
    /// SSH only
    Ssh,
    /// Serial only
    Serial,
}

impl FromStr for TransportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "ssh" => Ok(Self::Ssh),
            "serial" => Ok(Self::Serial),
            other => Err(format!("unknown transport: {other}")),
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Ssh => write!(f, "ssh"),
            Self::Serial => write!(f, "serial"),
        }
    }
}

/// Line ending appended to everything written to the serial console
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LineEnding {
    /// CR only, what most serial gettys expect
    #[default]
    Cr,
    /// LF only
    Lf,
    /// CR+LF
    CrLf,
}

impl LineEnding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cr => "\r",
            Self::Lf => "\n",
            Self::CrLf => "\r\n",
        }
    }
}

impl FromStr for LineEnding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CR" => Ok(Self::Cr),
            "LF" => Ok(Self::Lf),
            "CRLF" => Ok(Self::CrLf),
            other => Err(format!("unknown line ending: {other}")),
        }
    }
}

/// Username and password shared by both transports
#[derive(Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// SSH connection settings
#[derive(Debug, Clone)]
pub struct SshSettings {
    /// Hostname or IP address
    pub host: String,
    /// Port (default: 22)
    pub port: u16,
    /// Bound for TCP connect, banner exchange and authentication
    pub connect_timeout: Duration,
}

/// Command used to confirm the serial shell belongs to Linux
#[derive(Debug, Clone)]
pub struct LinuxCheck {
    /// Command to run, `uname -s` by default
    pub command: String,
    /// Regex its output must match
    pub expect_regex: String,
}

impl Default for LinuxCheck {
    fn default() -> Self {
        Self {
            command: "uname -s".to_string(),
            expect_regex: r"\bLinux\b".to_string(),
        }
    }
}

/// Serial console settings
#[derive(Debug, Clone)]
pub struct SerialSettings {
    /// Explicit device; `None` means auto-discovery
    pub device: Option<String>,
    /// Patterns scanned during auto-discovery
    pub scan_globs: Vec<String>,
    /// Baud rate
    pub baud: u32,
    /// Line ending for writes
    pub line_ending: LineEnding,
    /// Console username when it differs from the SSH one
    pub username: Option<String>,
    /// Time spent deciding whether one candidate is the console
    pub scan_timeout: Duration,
    /// Linux verification; `None` skips it
    pub linux_check: Option<LinuxCheck>,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            device: None,
            scan_globs: DEFAULT_SCAN_GLOBS.iter().map(|g| (*g).to_string()).collect(),
            baud: 115_200,
            line_ending: LineEnding::Cr,
            username: None,
            scan_timeout: Duration::from_secs(8),
            linux_check: Some(LinuxCheck::default()),
        }
    }
}

/// What to do when a command fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchPolicy {
    /// Stop at the first non-zero exit status or unmet expectation
    pub stop_on_failure: bool,
    /// Keep going after a command times out
    pub continue_after_timeout: bool,
}

/// One command plus optional output expectations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub command: String,
    pub expect_substring: Option<String>,
    pub expect_regex: Option<String>,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            expect_substring: None,
            expect_regex: None,
        }
    }

    #[must_use]
    pub fn expect_substring(mut self, substring: impl Into<String>) -> Self {
        self.expect_substring = Some(substring.into());
        self
    }

    #[must_use]
    pub fn expect_regex(mut self, pattern: impl Into<String>) -> Self {
        self.expect_regex = Some(pattern.into());
        self
    }

    /// Check captured output against the expectations
    pub fn check(&self, output: &str) -> Result<(), String> {
        if let Some(ref needle) = self.expect_substring {
            if !output.contains(needle.as_str()) {
                return Err(format!("Expected substring not found: {needle:?}"));
            }
        }
        if let Some(ref pattern) = self.expect_regex {
            let re = compile(pattern)
                .map_err(|e| format!("Invalid expectation regex {pattern:?}: {e}"))?;
            if !re.is_match(output) {
                return Err(format!("Expected regex not matched: {pattern:?}"));
            }
        }
        Ok(())
    }
}

impl From<&str> for CommandSpec {
    fn from(command: &str) -> Self {
        Self::new(command)
    }
}

/// Complete configuration for one run
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub transport: TransportMode,
    pub ssh: SshSettings,
    pub serial: SerialSettings,
    pub credentials: Credentials,
    /// Shell prompt regex
    pub prompt_regex: String,
    /// Whole-run budget; `None` means no limit
    pub overall_timeout: Option<Duration>,
    /// Per-command budget; `None` means only the overall budget applies
    pub command_timeout: Option<Duration>,
    pub policy: BatchPolicy,
}

impl RunnerConfig {
    /// Create a configuration with defaults for everything but the target
    pub fn new(host: &str, username: &str, password: &str) -> Self {
        Self {
            transport: TransportMode::Auto,
            ssh: SshSettings {
                host: host.to_string(),
                port: 22,
                connect_timeout: Duration::from_secs(5),
            },
            serial: SerialSettings::default(),
            credentials: Credentials::new(username, password),
            prompt_regex: r"[$#] ?$".to_string(),
            overall_timeout: Some(Duration::from_secs(1800)),
            command_timeout: Some(Duration::from_secs(300)),
            policy: BatchPolicy::default(),
        }
    }

    #[must_use]
    pub fn transport(mut self, mode: TransportMode) -> Self {
        self.transport = mode;
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.ssh.port = port;
        self
    }

    #[must_use]
    pub fn prompt_regex(mut self, pattern: impl Into<String>) -> Self {
        self.prompt_regex = pattern.into();
        self
    }

    #[must_use]
    pub fn overall_timeout(mut self, limit: Option<Duration>) -> Self {
        self.overall_timeout = limit;
        self
    }

    #[must_use]
    pub fn command_timeout(mut self, limit: Option<Duration>) -> Self {
        self.command_timeout = limit;
        self
    }

    #[must_use]
    pub fn serial_device(mut self, device: Option<String>) -> Self {
        self.serial.device = device;
        self
    }

    #[must_use]
    pub fn policy(mut self, policy: BatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Username used on the serial console
    pub fn serial_username(&self) -> &str {
        self.serial
            .username
            .as_deref()
            .unwrap_or(&self.credentials.username)
    }

    /// `user@host:port`, for messages
    pub fn ssh_target(&self) -> String {
        format!(
            "{}@{}:{}",
            self.credentials.username, self.ssh.host, self.ssh.port
        )
    }

    /// Reject configurations that cannot work before touching any device
    pub fn validate(&self) -> Result<(), RunError> {
        compile(&self.prompt_regex)
            .map_err(|e| RunError::Config(format!("invalid prompt regex: {e}")))?;

        if self.transport != TransportMode::Serial {
            if self.ssh.host.trim().is_empty() {
                return Err(RunError::Config("missing target host".into()));
            }
            if self.credentials.username.trim().is_empty() {
                return Err(RunError::Config("missing target username".into()));
            }
        }

        if let Some(ref check) = self.serial.linux_check {
            compile(&check.expect_regex)
                .map_err(|e| RunError::Config(format!("invalid linux check regex: {e}")))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_never_shows_password() {
        let config = RunnerConfig::new("10.0.0.2", "nvidia", "hunter2");
        let rendered = format!("{config:?}");
        assert!(rendered.contains("nvidia"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_parse_modes_and_endings() {
        assert_eq!("SERIAL".parse::<TransportMode>().unwrap(), TransportMode::Serial);
        assert!("telnet".parse::<TransportMode>().is_err());
        assert_eq!("crlf".parse::<LineEnding>().unwrap().as_str(), "\r\n");
        assert_eq!(LineEnding::default().as_str(), "\r");
    }

    #[test]
    fn test_command_expectations() {
        let spec = CommandSpec::new("uname -a")
            .expect_substring("Linux")
            .expect_regex(r"aarch64$");
        assert!(spec.check("Linux jetson 5.10 aarch64").is_ok());
        assert!(spec.check("Darwin mac 23.1 arm64").unwrap_err().contains("substring"));
        assert!(spec.check("Linux pc 6.1 x86_64").unwrap_err().contains("regex"));
    }

    #[test]
    fn test_validate() {
        let config = RunnerConfig::new("", "nvidia", "pw");
        assert!(matches!(config.validate(), Err(RunError::Config(_))));

        let serial_only = RunnerConfig::new("", "nvidia", "pw").transport(TransportMode::Serial);
        assert!(serial_only.validate().is_ok());

        let bad_prompt = RunnerConfig::new("h", "u", "p").prompt_regex("([");
        assert!(bad_prompt.validate().is_err());
    }

    #[test]
    fn test_serial_username_override() {
        let mut config = RunnerConfig::new("h", "nvidia", "pw");
        assert_eq!(config.serial_username(), "nvidia");
        config.serial.username = Some("root".into());
        assert_eq!(config.serial_username(), "root");
    }
}
