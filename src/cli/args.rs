//! Command-line arguments
//!
//! `clap` derive definitions for the `termrunner` binary and the rules that
//! turn them, together with [`TargetDefaults`], into a [`RunnerConfig`].

use crate::config::{
    build_prompt_regex, BatchPolicy, CommandSpec, LinuxCheck, RunnerConfig, TargetDefaults,
    TransportMode,
};
use crate::core::deadline::limit_from_secs;
use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Serial device value that requests auto-discovery
pub const AUTO_DEVICE: &str = "auto";

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON for scripting
    Json,
}

/// Transport selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportArg {
    /// SSH first, serial console on failure
    Auto,
    /// SSH only
    Ssh,
    /// Serial console only
    Serial,
}

impl From<TransportArg> for TransportMode {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Auto => Self::Auto,
            TransportArg::Ssh => Self::Ssh,
            TransportArg::Serial => Self::Serial,
        }
    }
}

/// Line ending sent to the serial console
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LineEndingArg {
    /// CR only
    Cr,
    /// LF only
    Lf,
    /// CR+LF
    Crlf,
}

impl From<LineEndingArg> for crate::config::LineEnding {
    fn from(arg: LineEndingArg) -> Self {
        match arg {
            LineEndingArg::Cr => Self::Cr,
            LineEndingArg::Lf => Self::Lf,
            LineEndingArg::Crlf => Self::CrLf,
        }
    }
}

/// Termrunner CLI
#[derive(Parser, Debug)]
#[command(
    name = "termrunner",
    author,
    version,
    about = "Run shell commands on a headless device over SSH with serial-console fallback",
    long_about = None
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Also write a daily rolling log file (default: platform data dir)
    #[arg(long, global = true, value_name = "DIR", num_args = 0..=1)]
    pub log_dir: Option<Option<PathBuf>>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a command batch on the target
    Run(RunArgs),

    /// Probe serial devices and report what answers on each
    Probe(ProbeArgs),

    /// List candidate serial devices and ports known to the OS
    ListDevices {
        /// Extra device globs to scan
        #[arg(long = "scan-glob", value_name = "GLOB")]
        scan_globs: Vec<String>,
    },

    /// Show the exit code table
    ExitCodes,
}

/// Target and serial settings shared by `run` and `probe`
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Target defaults file (TOML)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Target host name or IP
    #[arg(long)]
    pub host: Option<String>,

    /// SSH port
    #[arg(long, default_value_t = 22)]
    pub port: u16,

    /// Login user
    #[arg(short, long)]
    pub user: Option<String>,

    /// Login password
    #[arg(long, conflicts_with = "password_env")]
    pub password: Option<String>,

    /// Read the password from this environment variable
    #[arg(long, value_name = "NAME")]
    pub password_env: Option<String>,

    /// Shell prompt regex; `<username>` is replaced by the escaped user
    #[arg(long)]
    pub prompt_regex: Option<String>,

    /// Serial device path, or `auto` to discover one
    #[arg(long, value_name = "PATH")]
    pub serial_device: Option<String>,

    /// Extra device globs to scan during discovery
    #[arg(long = "scan-glob", value_name = "GLOB")]
    pub scan_globs: Vec<String>,

    /// Serial baud rate
    #[arg(long, default_value_t = 115_200)]
    pub baud: u32,

    /// Line ending sent to the serial console
    #[arg(long, value_enum, default_value_t = LineEndingArg::Cr)]
    pub line_ending: LineEndingArg,

    /// Serial login user when it differs from the SSH user
    #[arg(long)]
    pub serial_username: Option<String>,

    /// Per-device probe budget in seconds
    #[arg(long, value_name = "SECS", default_value_t = 8.0)]
    pub scan_timeout: f64,
}

impl TargetArgs {
    /// Load target defaults from file and environment
    pub fn load_defaults(&self) -> anyhow::Result<TargetDefaults> {
        let defaults = TargetDefaults::load(self.config.as_deref())
            .context("failed to load target defaults")?;
        Ok(defaults.with_env())
    }

    /// Password from the flag, the named variable or the defaults
    fn password(
        &self,
        defaults: &TargetDefaults,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> anyhow::Result<String> {
        if let Some(ref password) = self.password {
            return Ok(password.clone());
        }
        if let Some(ref name) = self.password_env {
            return match lookup(name) {
                Some(password) => Ok(password),
                None => bail!("environment variable {name} is not set"),
            };
        }
        Ok(defaults.password.clone().unwrap_or_default())
    }

    /// Base configuration: flags first, then defaults
    pub fn to_config(
        &self,
        defaults: &TargetDefaults,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> anyhow::Result<RunnerConfig> {
        let host = self.host.clone().or_else(|| defaults.ip.clone()).unwrap_or_default();
        let user = self.user.clone().or_else(|| defaults.user.clone()).unwrap_or_default();
        let password = self.password(defaults, lookup)?;

        let prompt_source = self.prompt_regex.as_deref().or(defaults.prompt_regex.as_deref());
        let prompt_user = self.serial_username.as_deref().unwrap_or(&user);
        let prompt = build_prompt_regex(prompt_source, Some(prompt_user));

        let device = self
            .serial_device
            .clone()
            .or_else(|| defaults.serial_device.clone())
            .filter(|d| !d.eq_ignore_ascii_case(AUTO_DEVICE));

        let mut config = RunnerConfig::new(&host, &user, &password)
            .port(self.port)
            .prompt_regex(prompt)
            .serial_device(device);

        config.serial.baud = self.baud;
        config.serial.line_ending = self.line_ending.into();
        config.serial.username = self.serial_username.clone();
        config.serial.scan_timeout =
            limit_from_secs(self.scan_timeout).unwrap_or(config.serial.scan_timeout);
        for glob in &self.scan_globs {
            if !config.serial.scan_globs.contains(glob) {
                config.serial.scan_globs.push(glob.clone());
            }
        }
        Ok(config)
    }
}

/// Arguments of `run`
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Transport to use
    #[arg(short, long, value_enum, default_value_t = TransportArg::Auto)]
    pub transport: TransportArg,

    /// Command to run (repeatable, runs before trailing commands)
    #[arg(short = 'c', long = "command", value_name = "CMD")]
    pub command: Vec<String>,

    /// Commands to run, in order
    #[arg(value_name = "COMMANDS", trailing_var_arg = true)]
    pub commands: Vec<String>,

    /// Expected output substring, matched to commands by position
    #[arg(long = "expect", value_name = "TEXT")]
    pub expect: Vec<String>,

    /// Expected output regex, matched to commands by position
    #[arg(long = "expect-regex", value_name = "REGEX")]
    pub expect_regex: Vec<String>,

    /// Overall budget in seconds (<= 0 disables)
    #[arg(long, value_name = "SECS", default_value_t = 1800.0, allow_negative_numbers = true)]
    pub overall_timeout: f64,

    /// Per-command budget in seconds (<= 0 disables)
    #[arg(long, value_name = "SECS", default_value_t = 300.0, allow_negative_numbers = true)]
    pub command_timeout: f64,

    /// SSH TCP connect budget in seconds
    #[arg(long, value_name = "SECS", default_value_t = 5.0)]
    pub ssh_connect_timeout: f64,

    /// Do not verify the serial shell is Linux
    #[arg(long)]
    pub skip_linux_check: bool,

    /// Command used to verify the serial shell
    #[arg(long, value_name = "CMD")]
    pub linux_check_command: Option<String>,

    /// Regex the verification output must match
    #[arg(long, value_name = "REGEX")]
    pub linux_check_regex: Option<String>,

    /// Stop after the first failing command
    #[arg(long)]
    pub stop_on_failure: bool,

    /// Keep going after a command timeout
    #[arg(long)]
    pub continue_after_timeout: bool,

    /// Write the transcript to this file
    #[arg(long, value_name = "PATH")]
    pub transcript_file: Option<PathBuf>,
}

impl RunArgs {
    /// Commands in execution order: `-c` values, then trailing ones
    pub fn command_specs(&self) -> anyhow::Result<Vec<CommandSpec>> {
        let mut specs: Vec<CommandSpec> = self
            .command
            .iter()
            .chain(self.commands.iter())
            .filter(|c| !c.trim().is_empty())
            .map(|c| CommandSpec::new(c.as_str()))
            .collect();

        if specs.is_empty() {
            bail!("no commands given");
        }
        if self.expect.len() > specs.len() || self.expect_regex.len() > specs.len() {
            bail!("more expectations than commands ({} commands)", specs.len());
        }

        for (spec, text) in specs.iter_mut().zip(&self.expect) {
            if !text.is_empty() {
                spec.expect_substring = Some(text.clone());
            }
        }
        for (spec, pattern) in specs.iter_mut().zip(&self.expect_regex) {
            if !pattern.is_empty() {
                regex::Regex::new(pattern)
                    .with_context(|| format!("invalid --expect-regex {pattern:?}"))?;
                spec.expect_regex = Some(pattern.clone());
            }
        }
        Ok(specs)
    }

    /// Full runner configuration
    pub fn to_config(
        &self,
        defaults: &TargetDefaults,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> anyhow::Result<RunnerConfig> {
        let mut config = self
            .target
            .to_config(defaults, lookup)?
            .transport(self.transport.into())
            .overall_timeout(limit_from_secs(self.overall_timeout))
            .command_timeout(limit_from_secs(self.command_timeout))
            .policy(BatchPolicy {
                stop_on_failure: self.stop_on_failure,
                continue_after_timeout: self.continue_after_timeout,
            });

        config.ssh.connect_timeout =
            limit_from_secs(self.ssh_connect_timeout).unwrap_or(Duration::from_secs(5));
        config.serial.linux_check = if self.skip_linux_check {
            None
        } else {
            let mut check = LinuxCheck::default();
            if let Some(ref command) = self.linux_check_command {
                check.command = command.clone();
            }
            if let Some(ref pattern) = self.linux_check_regex {
                check.expect_regex = pattern.clone();
            }
            Some(check)
        };
        Ok(config)
    }
}

/// Arguments of `probe`
#[derive(Args, Debug, Clone)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Terminate processes holding the devices before probing
    #[arg(long)]
    pub release_holders: bool,
}
