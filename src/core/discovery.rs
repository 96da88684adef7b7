//! Serial device discovery
//!
//! Finds candidate console devices by glob, then picks the first one that
//! answers with a shell. Probing itself lives in the serial transport; the
//! selection rule here is a pure function over probe results.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

/// Classification of a probed device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeState {
    /// A shell prompt was reached
    Shell,
    /// Output seen but no usable shell
    AliveNoShell,
    /// No output at all
    NoTerminal,
    /// Not probed, used as given
    Unknown,
}

impl fmt::Display for ProbeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Shell => "shell",
            Self::AliveNoShell => "alive_no_shell",
            Self::NoTerminal => "no_terminal",
            Self::Unknown => "unknown",
        })
    }
}

/// Outcome of probing one device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortProbeResult {
    /// Device path (comma-joined candidates when none responded)
    pub device: String,
    /// Console text collected while probing, or the failure reason
    pub transcript: String,
    pub state: ProbeState,
}

impl PortProbeResult {
    pub fn new(
        device: impl Into<String>,
        transcript: impl Into<String>,
        state: ProbeState,
    ) -> Self {
        Self {
            device: device.into(),
            transcript: transcript.into(),
            state,
        }
    }

    /// Explicitly configured device, not probed
    pub fn explicit(device: impl Into<String>) -> Self {
        Self::new(device, "", ProbeState::Unknown)
    }
}

/// Translate a file-name glob (`*`, `?`) to an anchored regex
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

/// Expand one glob. Wildcards are honoured in the last path component only.
fn expand_glob(pattern: &str) -> Vec<String> {
    let path = Path::new(pattern);
    let (Some(dir), Some(name)) = (path.parent(), path.file_name().and_then(|n| n.to_str())) else {
        return Vec::new();
    };

    if !name.contains(&['*', '?'][..]) {
        return if path.exists() {
            vec![pattern.to_string()]
        } else {
            Vec::new()
        };
    }

    let Some(matcher) = glob_to_regex(name) else {
        return Vec::new();
    };
    let dir = if dir.as_os_str().is_empty() { Path::new(".") } else { dir };

    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_str().is_some_and(|n| matcher.is_match(n)))
        .map(|entry| dir.join(entry.file_name()).to_string_lossy().into_owned())
        .collect()
}

#[cfg(unix)]
fn looks_like_device(path: &str) -> bool {
    use std::os::unix::fs::FileTypeExt;

    match std::fs::metadata(path) {
        Ok(meta) if meta.file_type().is_char_device() => true,
        Ok(meta) if meta.is_dir() => false,
        Ok(_) => {
            debug!(path, "candidate is not a character device, keeping it anyway");
            true
        }
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn looks_like_device(path: &str) -> bool {
    Path::new(path).exists()
}

/// Candidate devices for the given globs, deduplicated and sorted
pub fn candidate_devices<S: AsRef<str>>(globs: &[S]) -> Vec<String> {
    let found: BTreeSet<String> = globs
        .iter()
        .flat_map(|g| expand_glob(g.as_ref()))
        .filter(|p| looks_like_device(p))
        .collect();
    debug!(count = found.len(), "serial candidates");
    found.into_iter().collect()
}

/// Pick a device from `candidates` using `probe`.
///
/// The first `Shell` wins; otherwise the first `AliveNoShell`; otherwise a
/// `NoTerminal` result naming every candidate.
pub fn select_device<F>(candidates: &[String], mut probe: F) -> PortProbeResult
where
    F: FnMut(&str) -> PortProbeResult,
{
    if candidates.is_empty() {
        return PortProbeResult::new("", "No serial devices found", ProbeState::NoTerminal);
    }

    let mut first_alive: Option<PortProbeResult> = None;

    for device in candidates {
        let result = probe(device);
        info!(device = %device, state = %result.state, "probed serial device");
        match result.state {
            ProbeState::Shell => return result,
            ProbeState::AliveNoShell if first_alive.is_none() => first_alive = Some(result),
            _ => {}
        }
    }

    first_alive.unwrap_or_else(|| {
        PortProbeResult::new(
            candidates.join(", "),
            "Could not auto-detect a responding serial console",
            ProbeState::NoTerminal,
        )
    })
}
