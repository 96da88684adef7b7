//! Run transcript
//!
//! Accumulates everything a run produced: status notes, command sections and
//! command output. Optionally mirrors each piece to stdout as it arrives so
//! long batches show progress.

use std::io::Write;
use std::path::Path;

/// Prefix for status notes
pub const NOTE_PREFIX: &str = "[termrunner]";

/// Text transcript of one run
#[derive(Debug, Default)]
pub struct Transcript {
    text: String,
    live: bool,
}

impl Transcript {
    /// Create a silent transcript
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transcript that echoes to stdout
    pub fn live() -> Self {
        Self {
            text: String::new(),
            live: true,
        }
    }

    fn push(&mut self, piece: &str) {
        if self.live {
            let mut out = std::io::stdout().lock();
            let _ = out.write_all(piece.as_bytes());
            let _ = out.flush();
        }
        self.text.push_str(piece);
    }

    /// Status line: `[termrunner] <message>`
    pub fn note(&mut self, message: &str) {
        self.push(&format!("{NOTE_PREFIX} {message}\n"));
    }

    /// Status line followed by a block of captured text
    pub fn note_block(&mut self, heading: &str, block: &str) {
        if block.trim().is_empty() {
            return;
        }
        self.push(&format!("\n{NOTE_PREFIX} {heading}:\n"));
        self.output(block);
    }

    /// Section header for command `index` of `total`
    pub fn section(&mut self, index: usize, total: usize, command: &str) {
        self.push(&format!("===== COMMAND {index}/{total} =====\n$ {command}\n"));
    }

    /// Command output, newline-terminated
    pub fn output(&mut self, output: &str) {
        if output.is_empty() {
            return;
        }
        if output.ends_with('\n') {
            self.push(output);
        } else {
            self.push(&format!("{output}\n"));
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }

    /// Number of command sections written so far
    pub fn section_count(&self) -> usize {
        self.text
            .lines()
            .filter(|l| l.starts_with("===== COMMAND "))
            .count()
    }

    /// Write the transcript to `path`, creating parent directories
    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        write_text(path, &self.text)
    }
}

/// Write transcript text to `path`, creating parent directories
pub fn write_text(path: &Path, text: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sections_and_notes() {
        let mut t = Transcript::new();
        t.note("selected device: /dev/ttyUSB0");
        t.section(1, 2, "uname -a");
        t.output("Linux jetson");
        t.section(2, 2, "true");
        t.output("");

        assert_eq!(
            t.as_str(),
            "[termrunner] selected device: /dev/ttyUSB0\n\
             ===== COMMAND 1/2 =====\n$ uname -a\nLinux jetson\n\
             ===== COMMAND 2/2 =====\n$ true\n"
        );
        assert_eq!(t.section_count(), 2);
    }

    #[test]
    fn test_empty_block_is_skipped() {
        let mut t = Transcript::new();
        t.note_block("probe transcript (partial)", "  \r\n");
        assert!(t.as_str().is_empty());
        t.note_block("probe transcript (partial)", "login: ");
        assert!(t.as_str().contains("probe transcript (partial):\nlogin: \n"));
    }

    #[test]
    fn test_write_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("run.txt");
        let mut t = Transcript::new();
        t.note("done");
        t.write_to(&path).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "[termrunner] done\n");
    }
}
