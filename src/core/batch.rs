//! Batch execution
//!
//! Runs an ordered command list over an open transport, one transcript
//! section per command, applying the per-command and overall deadlines and
//! the failure policy.

use super::deadline::Deadline;
use super::error::{FailureKind, RunError};
use super::result::{CommandReport, CommandStatus};
use super::transcript::Transcript;
use super::transport::CommandTransport;
use crate::cli::exit_codes::ExitCodes;
use crate::config::{BatchPolicy, CommandSpec};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Why a batch ended unsuccessfully
#[derive(Debug, Clone)]
pub struct BatchFailure {
    pub kind: FailureKind,
    pub message: String,
    pub exit_code: u8,
}

impl BatchFailure {
    fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            exit_code: kind.exit_code(),
        }
    }
}

impl From<&RunError> for BatchFailure {
    fn from(err: &RunError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            exit_code: err.exit_code(),
        }
    }
}

/// Result of running a command list
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// One report per command, in order; unrun commands are `Skipped`
    pub reports: Vec<CommandReport>,
    /// First failure that decides the exit code
    pub failure: Option<BatchFailure>,
    /// First non-zero remote exit status
    pub first_nonzero: Option<i32>,
}

impl BatchOutcome {
    /// Process exit code: recorded failure, else first non-zero status, else 0
    pub fn exit_code(&self) -> u8 {
        if let Some(ref failure) = self.failure {
            return failure.exit_code;
        }
        match self.first_nonzero {
            Some(status) => u8::try_from(status)
                .ok()
                .filter(|c| *c != 0)
                .unwrap_or(ExitCodes::ERROR),
            None => ExitCodes::SUCCESS,
        }
    }

    fn record(&mut self, failure: BatchFailure) {
        if self.failure.is_none() {
            self.failure = Some(failure);
        }
    }
}

/// Batch runner settings
#[derive(Debug, Clone, Copy)]
pub struct BatchSettings {
    /// Per-command budget; `None` leaves only the overall deadline
    pub command_timeout: Option<Duration>,
    pub policy: BatchPolicy,
}

fn skipped(index: usize, spec: &CommandSpec) -> CommandReport {
    CommandReport {
        index,
        command: spec.command.clone(),
        status: CommandStatus::Skipped,
        exit_status: None,
        output: String::new(),
        detail: None,
        duration_ms: 0,
    }
}

/// Run `commands` in order over `transport`
pub fn run_batch(
    transport: &mut dyn CommandTransport,
    commands: &[CommandSpec],
    settings: BatchSettings,
    overall: Deadline,
    transcript: &mut Transcript,
) -> BatchOutcome {
    let total = commands.len();
    let mut outcome = BatchOutcome::default();

    for (i, spec) in commands.iter().enumerate() {
        let index = i + 1;

        let overall_spent = outcome
            .failure
            .as_ref()
            .is_some_and(|f| f.kind == FailureKind::OverallTimeout);
        if overall_spent || overall.is_expired() {
            outcome.record(BatchFailure::new(
                FailureKind::OverallTimeout,
                "overall timeout exceeded",
            ));
            outcome.reports.push(skipped(index, spec));
            continue;
        }
        if stop_requested(&outcome, settings.policy) {
            outcome.reports.push(skipped(index, spec));
            continue;
        }

        transcript.section(index, total, &spec.command);
        let deadline = Deadline::from_limit(settings.command_timeout).min(overall);
        let started = Instant::now();
        debug!(index, total, command = %spec.command, "running command");

        let result = match transport.run_command(&spec.command, deadline) {
            Ok(result) => result,
            Err(e) => {
                warn!(command = %spec.command, "command execution failed: {e}");
                transcript.note(&format!("ERROR: command execution failed: {e}"));
                outcome.record(BatchFailure::from(&e));
                let mut report = skipped(index, spec);
                report.status = CommandStatus::Failed;
                report.detail = Some(e.to_string());
                outcome.reports.push(report);
                // The transport is unusable; nothing after this can run.
                for (j, rest) in commands.iter().enumerate().skip(index) {
                    outcome.reports.push(skipped(j + 1, rest));
                }
                return outcome;
            }
        };

        transcript.output(&result.output);
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let mut report = CommandReport {
            index,
            command: spec.command.clone(),
            status: CommandStatus::Ok,
            exit_status: result.exit_status,
            output: result.output,
            detail: None,
            duration_ms,
        };

        if result.timed_out {
            report.status = CommandStatus::TimedOut;
            let failure = if overall.is_expired() {
                BatchFailure::new(
                    FailureKind::OverallTimeout,
                    "command did not complete before overall timeout",
                )
            } else {
                let after = settings.command_timeout.unwrap_or_default();
                BatchFailure::new(
                    FailureKind::CommandTimeout,
                    format!("command timed out after {}s: {}", after.as_secs_f64(), spec.command),
                )
            };
            transcript.note(&format!("ERROR: {}", failure.message));
            report.detail = Some(failure.message.clone());
            outcome.record(failure);
        } else if let Err(detail) = spec.check(&report.output) {
            report.status = CommandStatus::ExpectationFailed;
            transcript.note(&format!("ERROR: {detail}"));
            report.detail = Some(detail.clone());
            outcome.record(BatchFailure::new(FailureKind::ExpectationFailed, detail));
        } else if let Some(status) = report.exit_status.filter(|s| *s != 0) {
            report.status = CommandStatus::Failed;
            transcript.note(&format!("NOTE: remote exit status {status}"));
            report.detail = Some(format!("remote exit status {status}"));
            outcome.first_nonzero.get_or_insert(status);
        }

        outcome.reports.push(report);
    }

    outcome
}

/// Whether the policy says to stop after what happened so far
fn stop_requested(outcome: &BatchOutcome, policy: BatchPolicy) -> bool {
    let last = outcome.reports.last().map(|r| r.status);
    match last {
        Some(CommandStatus::TimedOut) => !policy.continue_after_timeout,
        Some(CommandStatus::Failed | CommandStatus::ExpectationFailed) => policy.stop_on_failure,
        Some(CommandStatus::Skipped) => true,
        _ => false,
    }
}
