//! Run reporting
//!
//! Renders results for humans (transcript, `ERROR: <tag>` line, summary) or
//! as JSON for scripts.

use super::args::OutputFormat;
use crate::core::discovery::{PortProbeResult, ProbeState};
use crate::core::result::ExecutionResult;
use crate::core::transcript::write_text;
use serde::Serialize;
use std::io::{self, Write};
use std::path::Path;
use tracing::warn;

/// How the run output should be shown
#[derive(Debug, Clone, Copy)]
pub struct ReportStyle {
    pub format: OutputFormat,
    pub quiet: bool,
    /// The transcript was already mirrored to stdout while running
    pub streamed: bool,
}

/// `ERROR: <tag>: <message>` for a failed run
pub fn error_line(result: &ExecutionResult) -> Option<String> {
    let kind = result.failure?;
    Some(match result.message {
        Some(ref message) => format!("ERROR: {}: {message}", kind.tag()),
        None => format!("ERROR: {}", kind.tag()),
    })
}

/// Print a run result
pub fn print_run(
    result: &ExecutionResult,
    style: ReportStyle,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> io::Result<()> {
    if style.format == OutputFormat::Json {
        let json = serde_json::to_string_pretty(result).map_err(io::Error::other)?;
        writeln!(out, "{json}")?;
    } else if !style.quiet {
        if !style.streamed {
            write!(out, "{}", result.output)?;
            if !result.output.is_empty() && !result.output.ends_with('\n') {
                writeln!(out)?;
            }
        }
        writeln!(err, "{}", result.summary())?;
    }

    if let Some(line) = error_line(result) {
        writeln!(err, "{line}")?;
    }
    Ok(())
}

/// Save the transcript; failures only warn
pub fn save_transcript(path: &Path, result: &ExecutionResult, err: &mut dyn Write) -> bool {
    match write_text(path, &result.output) {
        Ok(()) => true,
        Err(e) => {
            warn!(path = %path.display(), "failed to write transcript: {e}");
            let _ = writeln!(err, "WARNING: could not write transcript to {}: {e}", path.display());
            false
        }
    }
}

/// Print probe results, one line per device
pub fn print_probes(
    results: &[PortProbeResult],
    format: OutputFormat,
    verbose: bool,
    out: &mut dyn Write,
) -> io::Result<()> {
    if format == OutputFormat::Json {
        let json = serde_json::to_string_pretty(results).map_err(io::Error::other)?;
        return writeln!(out, "{json}");
    }

    if results.is_empty() {
        return writeln!(out, "No serial devices found.");
    }
    for result in results {
        writeln!(out, "{:<24} {}", result.device, result.state)?;
        if verbose && !result.transcript.trim().is_empty() {
            for line in result.transcript.lines() {
                writeln!(out, "    | {line}")?;
            }
        }
    }
    Ok(())
}

/// Best state across probe results
pub fn best_state(results: &[PortProbeResult]) -> Option<ProbeState> {
    let rank = |s: ProbeState| match s {
        ProbeState::Shell => 3,
        ProbeState::AliveNoShell => 2,
        ProbeState::Unknown => 1,
        ProbeState::NoTerminal => 0,
    };
    results.iter().map(|r| r.state).max_by_key(|s| rank(*s))
}

/// One OS-reported serial port
#[derive(Debug, Clone, Serialize)]
pub struct PortEntry {
    pub name: String,
    pub kind: String,
}

impl From<&serialport::SerialPortInfo> for PortEntry {
    fn from(info: &serialport::SerialPortInfo) -> Self {
        let kind = match info.port_type {
            serialport::SerialPortType::UsbPort(ref usb) => match usb.product {
                Some(ref product) => format!("USB {:04x}:{:04x} {product}", usb.vid, usb.pid),
                None => format!("USB {:04x}:{:04x}", usb.vid, usb.pid),
            },
            serialport::SerialPortType::PciPort => "PCI".to_string(),
            serialport::SerialPortType::BluetoothPort => "Bluetooth".to_string(),
            serialport::SerialPortType::Unknown => "Unknown".to_string(),
        };
        Self {
            name: info.port_name.clone(),
            kind,
        }
    }
}

/// Print discovery candidates and OS-enumerated ports
pub fn print_devices(
    candidates: &[String],
    ports: &[PortEntry],
    format: OutputFormat,
    out: &mut dyn Write,
) -> io::Result<()> {
    if format == OutputFormat::Json {
        let json = serde_json::json!({
            "candidates": candidates,
            "ports": ports,
        });
        let text = serde_json::to_string_pretty(&json).map_err(io::Error::other)?;
        return writeln!(out, "{text}");
    }

    writeln!(out, "Candidate console devices:")?;
    if candidates.is_empty() {
        writeln!(out, "  (none)")?;
    }
    for device in candidates {
        writeln!(out, "  {device}")?;
    }
    writeln!(out, "Serial ports:")?;
    if ports.is_empty() {
        writeln!(out, "  (none)")?;
    }
    for port in ports {
        writeln!(out, "  {:<24} {}", port.name, port.kind)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::FailureKind;
    use std::time::Duration;
    use tempfile::tempdir;

    fn result(failure: Option<FailureKind>) -> ExecutionResult {
        ExecutionResult {
            exit_code: failure.map_or(0, |k| k.exit_code()),
            transport: "serial".into(),
            failure,
            message: failure.map(|_| "no prompt after login".to_string()),
            output: "===== COMMAND 1/1 =====\n$ true".into(),
            commands: Vec::new(),
            duration: Duration::from_millis(1500),
        }
    }

    fn style(format: OutputFormat) -> ReportStyle {
        ReportStyle {
            format,
            quiet: false,
            streamed: false,
        }
    }

    #[test]
    fn test_text_report() {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let failed = result(Some(FailureKind::ShellNotReached));
        print_run(&failed, style(OutputFormat::Text), &mut out, &mut err).unwrap();

        let out = String::from_utf8(out).unwrap();
        let err = String::from_utf8(err).unwrap();
        assert!(out.ends_with("$ true\n"));
        assert!(err.contains("transport: serial"));
        assert!(err.contains("duration_s: 1.500"));
        assert!(err.lines().last().unwrap().starts_with("ERROR: "));
    }

    #[test]
    fn test_streamed_run_skips_transcript() {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let style = ReportStyle {
            streamed: true,
            ..style(OutputFormat::Text)
        };
        print_run(&result(None), style, &mut out, &mut err).unwrap();
        assert!(out.is_empty());
        assert!(!String::from_utf8(err).unwrap().contains("ERROR"));
    }

    #[test]
    fn test_json_report_parses() {
        let mut out = Vec::new();
        let mut err = Vec::new();
        print_run(&result(None), style(OutputFormat::Json), &mut out, &mut err).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["exit_code"], 0);
        assert_eq!(value["transport"], "serial");
    }

    #[test]
    fn test_save_transcript_creates_dirs_and_warns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs/run.txt");
        let mut err = Vec::new();
        assert!(save_transcript(&path, &result(None), &mut err));
        assert!(std::fs::read_to_string(&path).unwrap().contains("COMMAND 1/1"));

        // A directory cannot be written as a file.
        assert!(!save_transcript(dir.path(), &result(None), &mut err));
        assert!(String::from_utf8(err).unwrap().starts_with("WARNING:"));
    }

    #[test]
    fn test_best_state() {
        let results = vec![
            PortProbeResult::new("/dev/ttyUSB0", "", ProbeState::NoTerminal),
            PortProbeResult::new("/dev/ttyUSB1", "login:", ProbeState::AliveNoShell),
        ];
        assert_eq!(best_state(&results), Some(ProbeState::AliveNoShell));
        assert_eq!(best_state(&[]), None);
    }
}
