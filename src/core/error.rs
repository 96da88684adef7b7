//! Failure taxonomy for a run
//!
//! Every way a run can fail maps to one [`RunError`] variant, each variant to a
//! [`FailureKind`], and each kind to a stable process exit code so calling
//! automation can branch without parsing text.

use crate::cli::exit_codes::ExitCodes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Coarse failure category, printed as a short diagnostic tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No bytes at all from the transport
    Unreachable,
    /// Credentials rejected
    AuthFailure,
    /// Device answers but never offers a usable Linux shell
    AliveNoShell,
    /// Prompt-looking output that failed the ready-marker round trip
    SyncFailure,
    /// Output seen, but no shell prompt before the budget ran out
    ShellNotReached,
    /// A single command's completion marker never appeared
    CommandTimeout,
    /// The whole-run budget is exhausted
    OverallTimeout,
    /// A command's output did not satisfy its expectation
    ExpectationFailed,
    /// A command finished with a non-zero exit status
    CommandFailed,
    /// Serial device could not be opened or read
    SerialError,
    /// SSH transport broke after connecting
    TransportError,
    /// Invalid runner configuration
    Config,
}

impl FailureKind {
    /// Diagnostic tag printed after `ERROR:`
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Unreachable => "no terminal",
            Self::AuthFailure => "ssh authentication failed",
            Self::AliveNoShell => "serial is alive, but no linux shell",
            Self::SyncFailure => "failed to synchronize marker with prompt",
            Self::ShellNotReached => "could not reach a shell prompt on the selected device",
            Self::CommandTimeout => "command timed out",
            Self::OverallTimeout => "overall timeout exceeded",
            Self::ExpectationFailed => "command output did not meet expectation",
            Self::CommandFailed => "command failed",
            Self::SerialError => "serial error",
            Self::TransportError => "ssh transport error",
            Self::Config => "invalid configuration",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Errors raised while opening a transport or driving a batch
#[derive(Error, Debug)]
pub enum RunError {
    /// Serial console never produced a byte
    #[error("no terminal on {device}: {detail}")]
    NoTerminal {
        /// Device (or comma-joined candidates)
        device: String,
        /// Human-readable reason
        detail: String,
        /// Partial transcript collected before giving up
        transcript: String,
    },

    /// Device responds but never reaches a recognizable shell
    #[error("serial is alive, but no linux shell on {device}: {detail}")]
    AliveNoShell {
        /// Device path
        device: String,
        /// Human-readable reason
        detail: String,
        /// Partial transcript collected before giving up
        transcript: String,
    },

    /// Output arrived but no prompt matched before the wake deadline
    #[error("could not reach a shell prompt on {device}")]
    ShellNotReached {
        /// Device path
        device: String,
        /// Partial transcript
        transcript: String,
    },

    /// The ready marker did not come back
    #[error("failed to synchronize marker with prompt on {device}")]
    SyncFailed {
        /// Device path
        device: String,
        /// Output read while waiting for the marker
        transcript: String,
    },

    /// SSH host refused, unroutable or silent
    #[error("ssh connect to {target} failed: {reason}")]
    SshUnreachable {
        /// `user@host:port`
        target: String,
        /// Underlying error text
        reason: String,
        /// Whether the failure was a timeout
        timed_out: bool,
    },

    /// SSH credentials rejected
    #[error("ssh authentication failed for {target}: {reason}")]
    AuthFailure {
        /// `user@host:port`
        target: String,
        /// Underlying error text
        reason: String,
    },

    /// SSH session broke after authentication
    #[error("ssh channel error: {0}")]
    Channel(String),

    /// Serial device could not be opened or read
    #[error("serial error on {device}: {reason}")]
    Serial {
        /// Device path
        device: String,
        /// Underlying error text
        reason: String,
        /// Whether the failure is one of the known transient conditions
        retryable: bool,
    },

    /// A command's completion marker never appeared
    #[error("command timed out after {after:?}: {command}")]
    CommandTimeout {
        /// The command text
        command: String,
        /// Effective timeout that elapsed
        after: Duration,
    },

    /// Whole-run budget exhausted
    #[error("overall timeout exceeded")]
    OverallTimeout,

    /// Configuration rejected before any I/O
    #[error("invalid configuration: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunError {
    /// Failure category of this error
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NoTerminal { .. } | Self::SshUnreachable { .. } => FailureKind::Unreachable,
            Self::AliveNoShell { .. } => FailureKind::AliveNoShell,
            Self::ShellNotReached { .. } => FailureKind::ShellNotReached,
            Self::SyncFailed { .. } => FailureKind::SyncFailure,
            Self::AuthFailure { .. } => FailureKind::AuthFailure,
            Self::Channel(_) => FailureKind::TransportError,
            Self::Serial { .. } | Self::Io(_) => FailureKind::SerialError,
            Self::CommandTimeout { .. } => FailureKind::CommandTimeout,
            Self::OverallTimeout => FailureKind::OverallTimeout,
            Self::Config(_) => FailureKind::Config,
        }
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::SshUnreachable { .. } | Self::AuthFailure { .. } | Self::Channel(_) => {
                ExitCodes::SSH_FAILED
            }
            Self::NoTerminal { .. } => ExitCodes::NO_TERMINAL,
            _ => self.kind().exit_code(),
        }
    }

    /// Partial transcript attached to the error, if any
    pub fn transcript(&self) -> Option<&str> {
        match self {
            Self::NoTerminal { transcript, .. }
            | Self::AliveNoShell { transcript, .. }
            | Self::ShellNotReached { transcript, .. }
            | Self::SyncFailed { transcript, .. } => {
                Some(transcript.as_str()).filter(|t| !t.is_empty())
            }
            _ => None,
        }
    }

    /// Known transient serial condition that is worth reopening for
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Serial { retryable: true, .. })
    }

    /// SSH failure caused by a timeout (connect, banner or auth)
    pub fn is_ssh_timeout(&self) -> bool {
        matches!(self, Self::SshUnreachable { timed_out: true, .. })
    }

    /// In serial-only runs a device that cannot be opened is unreachable;
    /// other errors pass through unchanged.
    pub fn serial_unavailable_as_no_terminal(self) -> Self {
        match self {
            Self::Serial { device, reason, .. } => Self::NoTerminal {
                device,
                detail: format!("serial device unavailable: {reason}"),
                transcript: String::new(),
            },
            other => other,
        }
    }

    /// Failure that happened before a serial session became usable
    pub fn is_serial_open_failure(&self) -> bool {
        matches!(
            self,
            Self::Serial { .. }
                | Self::ShellNotReached { .. }
                | Self::SyncFailed { .. }
                | Self::Io(_)
        )
    }
}

impl FailureKind {
    /// Default exit code for a failure category
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Unreachable => ExitCodes::NO_TERMINAL,
            Self::AuthFailure | Self::TransportError => ExitCodes::SSH_FAILED,
            Self::AliveNoShell => ExitCodes::ALIVE_NO_SHELL,
            Self::SyncFailure => ExitCodes::SYNC_FAILED,
            Self::ShellNotReached => ExitCodes::SHELL_NOT_REACHED,
            Self::CommandTimeout => ExitCodes::COMMAND_TIMEOUT,
            Self::OverallTimeout => ExitCodes::OVERALL_TIMEOUT,
            Self::ExpectationFailed => ExitCodes::EXPECTATION_FAILED,
            Self::CommandFailed => ExitCodes::ERROR,
            Self::SerialError => ExitCodes::SERIAL_ERROR,
            Self::Config => ExitCodes::CONFIG_ERROR,
        }
    }
}
