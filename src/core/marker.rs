//! Completion markers
//!
//! A marker is echoed after each command; seeing it in the output means the
//! command finished. Tokens combine a millisecond timestamp with a
//! process-wide sequence number so two markers minted in the same millisecond
//! still differ.

use super::matcher::compile;
use regex::Regex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

const PREFIX: &str = "__TERMRUNNER";

/// What a marker is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    /// Session readiness round trip
    Ready,
    /// End of one command
    Done,
}

impl MarkerKind {
    fn label(self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Done => "DONE",
        }
    }
}

/// A unique completion marker
#[derive(Debug, Clone)]
pub struct Marker {
    token: String,
    pattern: Regex,
}

impl Marker {
    /// Mint a fresh marker
    pub fn new(kind: MarkerKind) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let token = format!("{PREFIX}_{}_{millis}_{seq}__", kind.label());
        let pattern = compile(&format!(r"{}:(-?\d+)\r?\n", regex::escape(&token)))
            .expect("escaped marker is a valid regex");
        Self { token, pattern }
    }

    /// The literal token that appears in output
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Shell line that prints the token followed by `:$?`.
    ///
    /// The token is split by an empty quoted string so the terminal's echo of
    /// the typed line never contains the literal token.
    pub fn echo_command(&self) -> String {
        let (head, tail) = self.token.split_at(PREFIX.len());
        format!("echo \"{head}\"\"{tail}:$?\"")
    }

    /// Find the complete marker line in `text`.
    ///
    /// Only matches once the `:<status>` suffix and its line end have
    /// arrived, so a read that stops right after the token is not taken as
    /// completion. Returns the byte offset where the marker starts and the
    /// reported exit status.
    pub fn find(&self, text: &str) -> Option<(usize, Option<i32>)> {
        self.pattern.captures(text).map(|caps| {
            let start = caps.get(0).map_or(0, |m| m.start());
            let status = caps.get(1).and_then(|m| m.as_str().parse().ok());
            (start, status)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_markers_unique_in_tight_loop() {
        let tokens: HashSet<String> = (0..50)
            .map(|_| Marker::new(MarkerKind::Done).token().to_string())
            .collect();
        assert_eq!(tokens.len(), 50);
    }

    #[test]
    fn test_echo_line_does_not_contain_token() {
        let marker = Marker::new(MarkerKind::Ready);
        let echo = marker.echo_command();
        assert!(!echo.contains(marker.token()));
        assert!(marker.find(&echo).is_none());
    }

    #[test]
    fn test_find_reports_status() {
        let marker = Marker::new(MarkerKind::Done);
        let output = format!("hello\r\n{}:2\r\n# ", marker.token());
        let (start, status) = marker.find(&output).unwrap();
        assert_eq!(start, "hello\r\n".len());
        assert_eq!(status, Some(2));

        let negative = format!("{}:-1\n", marker.token());
        assert_eq!(marker.find(&negative), Some((0, Some(-1))));
    }

    #[test]
    fn test_partial_marker_line_is_not_complete() {
        let marker = Marker::new(MarkerKind::Done);
        assert!(marker.find(&format!("out\r\n{}", marker.token())).is_none());
        assert!(marker.find(&format!("out\r\n{}:", marker.token())).is_none());
        assert!(marker.find(&format!("out\r\n{}:12", marker.token())).is_none());
        assert!(marker.find(&format!("{}\r\n", marker.token())).is_none());
    }
}
