//! Serial console transport implementation

use super::{CommandTransport, TransportKind};
use crate::config::RunnerConfig;
use crate::core::deadline::Deadline;
use crate::core::discovery::{self, PortProbeResult, ProbeState};
use crate::core::error::RunError;
use crate::core::matcher::PromptMatcher;
use crate::core::result::CommandOutput;
use crate::core::session::{ConsoleSession, SessionOptions};
use crate::core::stream::ConsoleStream;
use crate::core::transcript::Transcript;
use bytes::Bytes;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Open attempts for transient failures
const OPEN_ATTEMPTS: u32 = 3;

/// Delay between open attempts
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(600);

/// Floor for wake and sync budgets
const MIN_WAKE_BUDGET: Duration = Duration::from_secs(5);

/// Error messages that describe a contended or flapping port
const TRANSIENT_SNIPPETS: [&str; 5] = [
    "device reports readiness to read but returned no data",
    "multiple access on port",
    "could not open port",
    "resource busy",
    "resource temporarily unavailable",
];

/// Whether an error message describes a condition worth reopening for
pub fn transient_serial_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_SNIPPETS.iter().any(|s| lower.contains(s))
}

fn serial_error(device: &str, reason: String) -> RunError {
    let retryable = transient_serial_error(&reason);
    RunError::Serial {
        device: device.to_string(),
        reason,
        retryable,
    }
}

/// Raw serial port, 8N1 without flow control
pub struct SerialStream {
    port: Box<dyn SerialPort>,
    device: String,
}

impl SerialStream {
    /// Open `device` once
    pub fn open(device: &str, baud: u32) -> Result<Self, RunError> {
        let port = serialport::new(device, baud)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(200))
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => {
                    serial_error(device, format!("could not open port: no such device ({e})"))
                }
                serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                    serial_error(device, format!("permission denied: {e}"))
                }
                _ => serial_error(device, e.to_string()),
            })?;

        debug!(device, baud, "serial port open");
        Ok(Self {
            port,
            device: device.to_string(),
        })
    }
}

impl ConsoleStream for SerialStream {
    fn write(&mut self, data: &[u8]) -> Result<(), RunError> {
        self.port
            .write_all(data)
            .and_then(|()| self.port.flush())
            .map_err(|e| serial_error(&self.device, e.to_string()))
    }

    fn read_available(&mut self, chunk_timeout: Duration) -> Result<Bytes, RunError> {
        self.port
            .set_timeout(chunk_timeout)
            .map_err(|e| serial_error(&self.device, e.to_string()))?;

        let mut buffer = vec![0u8; 4096];
        match self.port.read(&mut buffer) {
            Ok(n) => {
                buffer.truncate(n);
                Ok(Bytes::from(buffer))
            }
            Err(ref e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                ) =>
            {
                Ok(Bytes::new())
            }
            Err(e) => Err(serial_error(&self.device, e.to_string())),
        }
    }

    fn flush_buffers(&mut self) -> Result<(), RunError> {
        self.port
            .clear(ClearBuffer::All)
            .map_err(|e| serial_error(&self.device, e.to_string()))
    }
}

/// Run `attempt` up to three times while it fails with a transient error
fn retry_transient<T, F>(device: &str, deadline: Deadline, mut attempt: F) -> Result<T, RunError>
where
    F: FnMut() -> Result<T, RunError>,
{
    let mut tries = 1;
    loop {
        match attempt() {
            Err(e) if e.is_retryable() && tries < OPEN_ATTEMPTS && !deadline.is_expired() => {
                warn!(device, attempt = tries, "transient serial error, retrying: {e}");
                std::thread::sleep(deadline.clamp(OPEN_RETRY_DELAY));
                tries += 1;
            }
            result => return result,
        }
    }
}

fn session_options(config: &RunnerConfig) -> SessionOptions {
    let username = config.serial_username();
    SessionOptions {
        line_ending: config.serial.line_ending,
        username: (!username.is_empty()).then(|| username.to_string()),
        password: Some(config.credentials.password.clone()).filter(|p| !p.is_empty()),
        timing: Default::default(),
    }
}

/// `max(5 s, command timeout)`, or 5 s when commands are unbounded
fn wake_budget(config: &RunnerConfig) -> Duration {
    config
        .command_timeout
        .map_or(MIN_WAKE_BUDGET, |t| t.max(MIN_WAKE_BUDGET))
}

/// Classify one candidate device
pub fn probe_device(config: &RunnerConfig, device: &str, deadline: Deadline) -> PortProbeResult {
    let matcher = match PromptMatcher::new(&config.prompt_regex) {
        Ok(m) => m,
        Err(e) => return PortProbeResult::new(device, e.to_string(), ProbeState::NoTerminal),
    };
    let deadline = deadline.within(config.serial.scan_timeout);

    let outcome = retry_transient(device, deadline, || {
        let mut stream = SerialStream::open(device, config.serial.baud)?;
        if let Err(e) = stream.flush_buffers() {
            debug!(device, "flush failed: {e}");
        }
        let mut session =
            ConsoleSession::probing(stream, device, matcher.clone(), session_options(config));
        Ok(session.probe(deadline))
    });

    match outcome {
        Ok(result) => result,
        Err(RunError::Serial { reason, .. }) => {
            PortProbeResult::new(device, format!("serial error: {reason}"), ProbeState::NoTerminal)
        }
        Err(e) => PortProbeResult::new(device, e.to_string(), ProbeState::NoTerminal),
    }
}

/// Serial console transport
pub struct SerialConsole {
    config: RunnerConfig,
    session: Option<ConsoleSession<SerialStream>>,
}

impl SerialConsole {
    /// Create a new serial console transport
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    /// Device to use: the configured one, or the best probed candidate
    pub fn select_device(&self, deadline: Deadline) -> PortProbeResult {
        if let Some(ref device) = self.config.serial.device {
            return PortProbeResult::explicit(device.clone());
        }
        let candidates = discovery::candidate_devices(&self.config.serial.scan_globs);
        discovery::select_device(&candidates, |device| probe_device(&self.config, device, deadline))
    }

    /// Open, wake, synchronize and verify one device
    fn attach(
        &self,
        device: &str,
        deadline: Deadline,
    ) -> Result<ConsoleSession<SerialStream>, RunError> {
        let matcher = PromptMatcher::new(&self.config.prompt_regex)?;
        let mut stream = SerialStream::open(device, self.config.serial.baud)?;
        if let Err(e) = stream.flush_buffers() {
            debug!(device, "flush failed: {e}");
        }

        let mut session =
            ConsoleSession::new(stream, device, matcher, session_options(&self.config));
        let budget = wake_budget(&self.config);

        let wake_deadline = if self.config.command_timeout.is_some() {
            deadline.within(budget)
        } else {
            deadline
        };
        session.wake(wake_deadline)?;
        session.sync(deadline.within(budget))?;

        if let Some(ref check) = self.config.serial.linux_check {
            session.verify_linux(check, deadline.within(budget))?;
        }
        Ok(session)
    }
}

impl CommandTransport for SerialConsole {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn open(&mut self, deadline: Deadline, transcript: &mut Transcript) -> Result<(), RunError> {
        let selection = self.select_device(deadline);

        match selection.state {
            ProbeState::NoTerminal => {
                return Err(RunError::NoTerminal {
                    device: selection.device,
                    detail: selection.transcript.clone(),
                    transcript: selection.transcript,
                });
            }
            ProbeState::AliveNoShell => {
                transcript.note(&format!("selected device (alive): {}", selection.device));
                return Err(RunError::AliveNoShell {
                    device: selection.device,
                    detail: "probe found output but no shell prompt".to_string(),
                    transcript: selection.transcript,
                });
            }
            ProbeState::Unknown => {
                transcript.note(&format!("selected device: {}", selection.device));
            }
            ProbeState::Shell => {
                transcript.note(&format!(
                    "selected device (terminal/shell console): {}",
                    selection.device
                ));
            }
        }

        let device = selection.device.clone();
        let session = retry_transient(&device, deadline, || self.attach(&device, deadline))?;

        info!(device = %device, "serial console synchronized");
        transcript.note_block("auto-detect transcript (partial)", &selection.transcript);
        transcript.note("synchronized. running commands...");
        self.session = Some(session);
        Ok(())
    }

    fn run_command(
        &mut self,
        command: &str,
        deadline: Deadline,
    ) -> Result<CommandOutput, RunError> {
        let session = self.session.as_mut().ok_or_else(|| RunError::Serial {
            device: self.config.serial.device.clone().unwrap_or_default(),
            reason: "console is not open".to_string(),
            retryable: false,
        })?;
        session.run_command(command, deadline)
    }

    fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.finish();
            debug!(
                device = %session.device(),
                states = %session.machine().describe(),
                "serial console closed"
            );
        }
    }
}

impl Drop for SerialConsole {
    fn drop(&mut self) {
        self.close();
    }
}

/// List serial ports known to the OS
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>, RunError> {
    serialport::available_ports().map_err(|e| serial_error("<enumerate>", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_transient_error_detection() {
        assert!(transient_serial_error("Device or resource busy"));
        assert!(transient_serial_error(
            "device reports readiness to read but returned no data \
             (device disconnected or multiple access on port?)"
        ));
        assert!(transient_serial_error("could not open port /dev/ttyUSB0"));
        assert!(!transient_serial_error("permission denied: /dev/ttyUSB0"));
        assert!(!transient_serial_error("Invalid argument"));
    }

    #[test]
    fn test_retry_stops_after_three_attempts() {
        let calls = Cell::new(0);
        let deadline = Deadline::after(Duration::from_secs(5));
        let result: Result<(), RunError> = retry_transient("/dev/x", deadline, || {
            calls.set(calls.get() + 1);
            Err(serial_error("/dev/x", "Device or resource busy".into()))
        });
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_fatal_error_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), RunError> = retry_transient("/dev/x", Deadline::never(), || {
            calls.set(calls.get() + 1);
            Err(serial_error("/dev/x", "permission denied".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_missing_device_probe_is_no_terminal() {
        let config = RunnerConfig::new("", "u", "p");
        let deadline = Deadline::after(Duration::from_secs(1));
        let result = probe_device(&config, "/dev/termrunner-missing-device", deadline);
        assert_eq!(result.state, ProbeState::NoTerminal);
        assert!(!result.transcript.is_empty());
    }

    #[test]
    fn test_wake_budget_has_floor() {
        let config = RunnerConfig::new("h", "u", "p").command_timeout(Some(Duration::from_secs(1)));
        assert_eq!(wake_budget(&config), MIN_WAKE_BUDGET);
        let long = RunnerConfig::new("h", "u", "p").command_timeout(Some(Duration::from_secs(60)));
        assert_eq!(wake_budget(&long), Duration::from_secs(60));
        let unbounded = RunnerConfig::new("h", "u", "p").command_timeout(None);
        assert_eq!(wake_budget(&unbounded), MIN_WAKE_BUDGET);
    }
}
