//! CLI Exit Codes
//!
//! Stable exit codes for automation. Callers branch on these numbers, so an
//! existing value must never be reassigned.

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Output seen but no shell prompt reached
    pub const SHELL_NOT_REACHED: u8 = 3;

    /// Ready marker did not round-trip
    pub const SYNC_FAILED: u8 = 4;

    /// Overall run budget exhausted
    pub const OVERALL_TIMEOUT: u8 = 5;

    /// A command's completion marker never appeared
    pub const COMMAND_TIMEOUT: u8 = 6;

    /// Command output did not meet its expectation
    pub const EXPECTATION_FAILED: u8 = 7;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Serial device could not be opened or read
    pub const SERIAL_ERROR: u8 = 10;

    /// No terminal: serial console silent or absent
    pub const NO_TERMINAL: u8 = 12;

    /// Serial console alive, but no Linux shell
    pub const ALIVE_NO_SHELL: u8 = 13;

    /// SSH connection or authentication failure
    pub const SSH_FAILED: u8 = 255;

    /// Every reserved code, in table order
    pub const ALL: [u8; 13] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 10, 12, 13, 255];
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Shell prompt not reached",
        4 => "Marker synchronization failed",
        5 => "Overall timeout exceeded",
        6 => "Command timed out",
        7 => "Expectation not met",
        8 => "Configuration error",
        10 => "Serial error",
        12 => "No terminal (unreachable)",
        13 => "Serial alive, but no Linux shell",
        255 => "SSH connection or authentication failed",
        _ => "Remote command exit status",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in ExitCodes::ALL {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
    println!("  other non-zero values are the first failing remote command's exit status");
}
