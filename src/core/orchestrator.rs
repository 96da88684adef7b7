//! Transport orchestration
//!
//! Picks the transport for a run, applies the SSH→serial fallback policy,
//! reclaims the serial device from other processes and turns whatever
//! happened into one [`ExecutionResult`].

use super::batch::{run_batch, BatchSettings};
use super::deadline::Deadline;
use super::error::RunError;
use super::result::{CommandReport, CommandStatus, ExecutionResult};
use super::transcript::Transcript;
use super::transport::{CommandTransport, SystemTransports, TransportFactory};
use crate::config::{CommandSpec, RunnerConfig, TransportMode};
use std::time::Instant;
use tracing::{info, warn};

/// Printed when SSH rejects the credentials in auto mode
pub const AUTH_GUIDANCE: &str =
    "ssh authentication failed; fix the target user/password and retry with --transport ssh";

/// Drives one run from configuration to result
pub struct Orchestrator<F: TransportFactory = SystemTransports> {
    factory: F,
    config: RunnerConfig,
    live: bool,
}

impl Orchestrator<SystemTransports> {
    /// Orchestrator with the real SSH and serial transports
    pub fn new(config: RunnerConfig) -> Self {
        Self::with_factory(config, SystemTransports)
    }
}

impl<F: TransportFactory> Orchestrator<F> {
    /// Orchestrator with custom transports
    pub fn with_factory(config: RunnerConfig, factory: F) -> Self {
        Self {
            factory,
            config,
            live: false,
        }
    }

    /// Mirror the transcript to stdout while running
    #[must_use]
    pub fn live(mut self, live: bool) -> Self {
        self.live = live;
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run `commands` and classify the outcome
    pub fn run(&self, commands: &[CommandSpec]) -> ExecutionResult {
        let started = Instant::now();
        let overall = Deadline::from_limit(self.config.overall_timeout);
        let mut transcript = if self.live {
            Transcript::live()
        } else {
            Transcript::new()
        };

        let (label, outcome) = match self.config.validate() {
            Err(e) => ("none".to_string(), Err(e)),
            Ok(()) => match self.config.transport {
                TransportMode::Ssh => {
                    let outcome = self.run_ssh(commands, overall, &mut transcript);
                    ("ssh".to_string(), outcome)
                }
                TransportMode::Serial => {
                    self.release_serial(&mut transcript);
                    let outcome = self
                        .run_serial(commands, overall, &mut transcript, false)
                        .map_err(RunError::serial_unavailable_as_no_terminal);
                    ("serial".to_string(), outcome)
                }
                TransportMode::Auto => self.run_auto(commands, overall, &mut transcript),
            },
        };

        let (exit_code, failure, message, reports) = match outcome {
            Ok(batch) => {
                let failure = batch.failure.as_ref().map(|f| f.kind);
                let message = batch.failure.as_ref().map(|f| f.message.clone());
                (batch.exit_code(), failure, message, batch.reports)
            }
            Err(e) => {
                if let Some(partial) = e.transcript() {
                    transcript.note_block("session transcript (partial)", partial);
                }
                let reports = commands
                    .iter()
                    .enumerate()
                    .map(|(i, spec)| CommandReport {
                        index: i + 1,
                        command: spec.command.clone(),
                        status: CommandStatus::Skipped,
                        exit_status: None,
                        output: String::new(),
                        detail: None,
                        duration_ms: 0,
                    })
                    .collect();
                (e.exit_code(), Some(e.kind()), Some(e.to_string()), reports)
            }
        };

        if exit_code == 0 {
            transcript.note("done");
        }

        ExecutionResult {
            exit_code,
            transport: label,
            failure,
            message,
            output: transcript.into_string(),
            commands: reports,
            duration: started.elapsed(),
        }
    }

    fn settings(&self) -> BatchSettings {
        BatchSettings {
            command_timeout: self.config.command_timeout,
            policy: self.config.policy,
        }
    }

    fn release_serial(&self, transcript: &mut Transcript) {
        transcript.note("cleaning up serial holders");
        let note = self.factory.release_serial_devices(&self.config);
        transcript.note(&note);
    }

    /// Open `transport` and run the batch on it
    fn execute(
        &self,
        mut transport: Box<dyn CommandTransport>,
        commands: &[CommandSpec],
        overall: Deadline,
        transcript: &mut Transcript,
    ) -> Result<super::batch::BatchOutcome, RunError> {
        transcript.note(&format!("transport: {}", transport.kind()));
        let opened = transport.open(overall, transcript);
        let outcome = opened.map(|()| {
            run_batch(transport.as_mut(), commands, self.settings(), overall, transcript)
        });
        transport.close();
        outcome
    }

    fn run_ssh(
        &self,
        commands: &[CommandSpec],
        overall: Deadline,
        transcript: &mut Transcript,
    ) -> Result<super::batch::BatchOutcome, RunError> {
        transcript.note(&format!("target: {}", self.config.ssh_target()));
        let result = self.execute(self.factory.ssh(&self.config), commands, overall, transcript);
        if let Err(ref e) = result {
            transcript.note(&format!("SSH connect failed: {e}"));
        }
        result
    }

    fn run_serial(
        &self,
        commands: &[CommandSpec],
        overall: Deadline,
        transcript: &mut Transcript,
        retry_after_ssh_timeout: bool,
    ) -> Result<super::batch::BatchOutcome, RunError> {
        let first = self.execute(self.factory.serial(&self.config), commands, overall, transcript);

        match first {
            Err(e)
                if retry_after_ssh_timeout
                    && e.is_serial_open_failure()
                    && !overall.is_expired() =>
            {
                warn!("serial fallback failed after ssh timeout, retrying once: {e}");
                transcript.note(&format!(
                    "first serial fallback failed after ssh timeout ({e}); retrying once"
                ));
                self.release_serial(transcript);
                self.execute(self.factory.serial(&self.config), commands, overall, transcript)
            }
            other => other,
        }
    }

    fn run_auto(
        &self,
        commands: &[CommandSpec],
        overall: Deadline,
        transcript: &mut Transcript,
    ) -> (String, Result<super::batch::BatchOutcome, RunError>) {
        let ssh_error = match self.run_ssh(commands, overall, transcript) {
            Ok(batch) => return ("auto(ssh)".to_string(), Ok(batch)),
            Err(e) => e,
        };

        if matches!(ssh_error, RunError::AuthFailure { .. }) {
            transcript.note(AUTH_GUIDANCE);
            return ("auto(ssh)".to_string(), Err(ssh_error));
        }

        info!("ssh failed, falling back to serial: {ssh_error}");
        transcript.note("ssh failed; attempting serial fallback...");

        let ssh_timed_out = ssh_error.is_ssh_timeout();
        if ssh_timed_out {
            transcript.note("ssh timeout detected; cleaning up serial holders before fallback");
            self.release_serial(transcript);
        }

        let label = "auto(serial-fallback)".to_string();
        if overall.is_expired() {
            return (label, Err(RunError::OverallTimeout));
        }
        (label, self.run_serial(commands, overall, transcript, ssh_timed_out))
    }
}
