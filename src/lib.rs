//! # Termrunner Core Library
//!
//! Runs shell commands on a headless Linux device that is reachable over SSH
//! or, when its network is down, over a serial console:
//! - SSH-2 (libssh2) with password authentication and `sudo` answering
//! - Serial consoles with automatic wake, login and device discovery
//! - SSH-first operation with serial fallback
//!
//! ## Features
//!
//! - Reachability classification (shell, alive without shell, no terminal)
//! - Unique completion markers with exit-status capture on serial
//! - Overall and per-command deadlines
//! - Cleanup of processes holding the serial device
//! - Stable exit codes for automation
//!
//! ## Example
//!
//! ```rust,no_run
//! use termrunner_core::{CommandSpec, Orchestrator, RunnerConfig, TransportMode};
//!
//! let config = RunnerConfig::new("192.168.55.1", "nvidia", "nvidia")
//!     .transport(TransportMode::Auto);
//! let result = Orchestrator::new(config).run(&[CommandSpec::new("uname -a")]);
//!
//! println!("{}", result.output);
//! std::process::exit(i32::from(result.exit_code));
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;
pub mod utils;

// Re-exports for convenience
pub use crate::cli::ExitCodes;
pub use crate::config::{
    build_prompt_regex, BatchPolicy, CommandSpec, Credentials, LineEnding, LinuxCheck,
    RunnerConfig, TargetDefaults, TransportMode,
};
pub use crate::core::deadline::Deadline;
pub use crate::core::discovery::{PortProbeResult, ProbeState};
pub use crate::core::error::{FailureKind, RunError};
pub use crate::core::orchestrator::Orchestrator;
pub use crate::core::result::{CommandOutput, CommandReport, CommandStatus, ExecutionResult};
pub use crate::core::transcript::Transcript;
pub use crate::core::transport::{CommandTransport, TransportFactory, TransportKind};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
