//! Transport layer for running commands on the target
//!
//! Supports:
//! - SSH-2 with password authentication, one PTY channel per command
//! - Serial consoles (USB-serial, CDC-ACM), marker-delimited commands

mod serial;
mod ssh;

pub use serial::{list_ports, probe_device, transient_serial_error, SerialConsole, SerialStream};
pub use ssh::{needs_sudo_password, SshExecutor};

use super::deadline::Deadline;
use super::error::RunError;
use super::holders;
use super::result::CommandOutput;
use super::transcript::Transcript;
use crate::config::RunnerConfig;
use serde::Serialize;
use std::fmt;
use tracing::info;

/// Transport type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// SSH
    Ssh,
    /// Serial console
    Serial,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ssh => write!(f, "ssh"),
            Self::Serial => write!(f, "serial"),
        }
    }
}

/// A way of running shell commands on the target
#[cfg_attr(test, mockall::automock)]
pub trait CommandTransport {
    /// Get transport type
    fn kind(&self) -> TransportKind;

    /// Connect and bring the remote shell to a usable state.
    ///
    /// Status notes go to `transcript`.
    fn open(&mut self, deadline: Deadline, transcript: &mut Transcript) -> Result<(), RunError>;

    /// Run one command; timing out is a result, not an error
    fn run_command(&mut self, command: &str, deadline: Deadline) -> Result<CommandOutput, RunError>;

    /// Release the connection
    fn close(&mut self);
}

/// Source of transports, injected into the orchestrator
#[cfg_attr(test, mockall::automock)]
pub trait TransportFactory {
    /// SSH executor for `config`
    fn ssh(&self, config: &RunnerConfig) -> Box<dyn CommandTransport>;

    /// Serial console for `config`
    fn serial(&self, config: &RunnerConfig) -> Box<dyn CommandTransport>;

    /// Terminate processes holding the serial device(s); returns a note
    fn release_serial_devices(&self, config: &RunnerConfig) -> String;
}

/// Real transports backed by `ssh2` and `serialport`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTransports;

impl TransportFactory for SystemTransports {
    fn ssh(&self, config: &RunnerConfig) -> Box<dyn CommandTransport> {
        Box::new(SshExecutor::new(config.clone()))
    }

    fn serial(&self, config: &RunnerConfig) -> Box<dyn CommandTransport> {
        Box::new(SerialConsole::new(config.clone()))
    }

    fn release_serial_devices(&self, config: &RunnerConfig) -> String {
        let devices = match config.serial.device {
            Some(ref device) => vec![device.clone()],
            None => super::discovery::candidate_devices(&config.serial.scan_globs),
        };

        let mut released = Vec::new();
        for device in &devices {
            let pids = holders::release_device(device, holders::TERM_GRACE);
            if !pids.is_empty() {
                info!(device = %device, ?pids, "terminated serial holders");
                released.push(format!(
                    "{device} ({})",
                    pids.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
                ));
            }
        }

        if released.is_empty() {
            "no processes were holding the serial device".to_string()
        } else {
            format!("terminated serial holders: {}", released.join("; "))
        }
    }
}
