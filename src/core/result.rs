//! Run results
//!
//! Per-command outcomes and the final [`ExecutionResult`] handed back to the
//! caller (and printed as JSON by the binary).

use super::error::FailureKind;
use crate::cli::exit_codes::ExitCodes;
use serde::Serialize;
use std::time::Duration;

/// Raw outcome of one command on a transport
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Captured output with command echo and marker removed
    pub output: String,
    /// Remote exit status, when the transport could read one
    pub exit_status: Option<i32>,
    /// Completion was not observed before the deadline
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn completed(output: impl Into<String>, exit_status: Option<i32>) -> Self {
        Self {
            output: output.into(),
            exit_status,
            timed_out: false,
        }
    }

    pub fn timed_out(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            exit_status: None,
            timed_out: true,
        }
    }
}

/// Verdict for one command in the batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// Exit status zero (or unknown) and expectations met
    Ok,
    /// Non-zero exit status
    Failed,
    /// Output did not satisfy the expectation
    ExpectationFailed,
    /// Completion not observed in time
    TimedOut,
    /// Not run because the batch stopped earlier
    Skipped,
}

/// Per-command report
#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    /// 1-based position in the batch
    pub index: usize,
    pub command: String,
    pub status: CommandStatus,
    pub exit_status: Option<i32>,
    pub output: String,
    /// Why the command counts as failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub duration_ms: u64,
}

/// Final result of a run
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// Process exit code
    pub exit_code: u8,
    /// `ssh`, `serial` or `none`
    pub transport: String,
    /// Failure category, `None` on success
    pub failure: Option<FailureKind>,
    /// Human-readable failure message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Full transcript
    pub output: String,
    pub commands: Vec<CommandReport>,
    #[serde(serialize_with = "serialize_secs")]
    pub duration: Duration,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64((d.as_secs_f64() * 1000.0).round() / 1000.0)
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.exit_code == ExitCodes::SUCCESS
    }

    /// Number of commands that actually ran
    pub fn commands_run(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| c.status != CommandStatus::Skipped)
            .count()
    }

    /// `transport=... commands=... rc=... duration_s=...` summary lines
    pub fn summary(&self) -> String {
        format!(
            "transport: {}\ncommands: {}/{}\nrc: {}\nduration_s: {:.3}",
            self.transport,
            self.commands_run(),
            self.commands.len(),
            self.exit_code,
            self.duration.as_secs_f64()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(index: usize, status: CommandStatus) -> CommandReport {
        CommandReport {
            index,
            command: format!("cmd{index}"),
            status,
            exit_status: None,
            output: String::new(),
            detail: None,
            duration_ms: 0,
        }
    }

    #[test]
    fn test_summary_counts_only_run_commands() {
        let result = ExecutionResult {
            exit_code: 6,
            transport: "serial".into(),
            failure: Some(FailureKind::CommandTimeout),
            message: None,
            output: String::new(),
            commands: vec![
                report(1, CommandStatus::Ok),
                report(2, CommandStatus::TimedOut),
                report(3, CommandStatus::Skipped),
            ],
            duration: Duration::from_millis(1500),
        };
        let summary = result.summary();
        assert!(summary.contains("transport: serial"));
        assert!(summary.contains("commands: 2/3"));
        assert!(summary.contains("rc: 6"));
        assert!(summary.contains("duration_s: 1.500"));
        assert!(!result.is_success());
    }

    #[test]
    fn test_json_shape() {
        let result = ExecutionResult {
            exit_code: 0,
            transport: "ssh".into(),
            failure: None,
            message: None,
            output: "ok".into(),
            commands: vec![report(1, CommandStatus::Ok)],
            duration: Duration::from_millis(250),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["transport"], "ssh");
        assert_eq!(json["commands"][0]["status"], "ok");
        assert_eq!(json["duration"], 0.25);
        assert!(json.get("message").is_none());
    }
}
