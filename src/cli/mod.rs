//! CLI Module
//!
//! Provides command-line interface functionality including:
//! - Argument definitions and config assembly
//! - Exit codes for automation
//! - Text and JSON reporting

pub mod args;
pub mod exit_codes;
pub mod report;

pub use args::{Cli, Commands, OutputFormat};
pub use exit_codes::{exit_code_description, print_exit_codes, ExitCodes};
