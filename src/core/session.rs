//! Serial console session
//!
//! A [`ConsoleSession`] owns a console byte stream and drives it from "some
//! unknown console state" to a synchronized shell: it wakes the console,
//! answers `login:`/`Password:` prompts, confirms the shell with a marker
//! round trip and then runs commands delimited by completion markers.
//!
//! Prompt classification only ever looks at text that arrived after the last
//! write, so a prompt that was already answered cannot be answered twice.

use super::deadline::Deadline;
use super::discovery::{PortProbeResult, ProbeState};
use super::error::RunError;
use super::marker::{Marker, MarkerKind};
use super::matcher::{compile, strip_ansi, PromptKind, PromptMatcher};
use super::result::CommandOutput;
use super::state_machine::{ConsoleState, ConsoleStateMachine};
use super::stream::ConsoleStream;
use crate::config::{LineEnding, LinuxCheck};
use std::time::Duration;
use tracing::{debug, warn};

/// Timing knobs for the wake sequence
#[derive(Debug, Clone)]
pub struct SessionTiming {
    /// Listening window after each empty-line poke
    pub probe_window: Duration,
    /// Upper bound for a single read
    pub chunk_timeout: Duration,
    /// Time to wait for a reply after sending the username
    pub login_wait: Duration,
    /// Time to wait for a reply after sending the password
    pub password_wait: Duration,
    /// Consecutive silent probe windows before giving up
    pub silence_cap: u32,
    /// Maximum usernames (and passwords) sent per wake
    pub max_login_attempts: u32,
    /// Transcript cap in bytes; older text is dropped
    pub max_buffer_chars: usize,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            probe_window: Duration::from_millis(800),
            chunk_timeout: Duration::from_millis(200),
            login_wait: Duration::from_secs(3),
            password_wait: Duration::from_secs(4),
            silence_cap: 2,
            max_login_attempts: 2,
            max_buffer_chars: 200_000,
        }
    }
}

/// Per-session settings
#[derive(Clone, Default)]
pub struct SessionOptions {
    pub line_ending: LineEnding,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timing: SessionTiming,
}

impl std::fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("line_ending", &self.line_ending)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("timing", &self.timing)
            .finish()
    }
}

/// Wake/login/command driver for one open console
pub struct ConsoleSession<S: ConsoleStream> {
    stream: S,
    device: String,
    matcher: PromptMatcher,
    options: SessionOptions,
    machine: ConsoleStateMachine,
    transcript: String,
    /// Transcript offset of the last write; prompts are looked for after it
    cursor: usize,
}

impl<S: ConsoleStream> ConsoleSession<S> {
    /// Create a session for a device already selected
    pub fn new(stream: S, device: &str, matcher: PromptMatcher, options: SessionOptions) -> Self {
        Self::with_machine(stream, device, matcher, options, ConsoleStateMachine::new())
    }

    /// Create a session that only classifies a candidate device
    pub fn probing(
        stream: S,
        device: &str,
        matcher: PromptMatcher,
        options: SessionOptions,
    ) -> Self {
        Self::with_machine(stream, device, matcher, options, ConsoleStateMachine::probing())
    }

    fn with_machine(
        stream: S,
        device: &str,
        matcher: PromptMatcher,
        options: SessionOptions,
        machine: ConsoleStateMachine,
    ) -> Self {
        Self {
            stream,
            device: device.to_string(),
            matcher,
            options,
            machine,
            transcript: String::new(),
            cursor: 0,
        }
    }

    /// Device path
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Everything read so far (capped)
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    /// State machine, for diagnostics
    pub fn machine(&self) -> &ConsoleStateMachine {
        &self.machine
    }

    fn enter(&mut self, state: ConsoleState, reason: &str) {
        if let Err(e) = self.machine.transition(state, reason) {
            warn!(device = %self.device, "{e}");
        }
    }

    fn tail(&self) -> &str {
        &self.transcript[self.cursor..]
    }

    fn append(&mut self, text: &str) {
        self.transcript.push_str(text);

        let cap = self.options.timing.max_buffer_chars;
        if self.transcript.len() > cap {
            let mut cut = self.transcript.len() - cap;
            while !self.transcript.is_char_boundary(cut) {
                cut += 1;
            }
            self.transcript.drain(..cut);
            self.cursor = self.cursor.saturating_sub(cut);
        }
    }

    fn write_raw(&mut self, text: &str) -> Result<(), RunError> {
        let line = format!("{text}{}", self.options.line_ending.as_str());
        self.stream.write(line.as_bytes())
    }

    /// Write a line and move the classification cursor past existing output
    fn write_line(&mut self, text: &str) -> Result<(), RunError> {
        debug!(device = %self.device, line = %text, "console write");
        self.cursor = self.transcript.len();
        self.write_raw(text)
    }

    /// Like `write_line`, but the text never reaches a log
    fn send_secret(&mut self, secret: &str) -> Result<(), RunError> {
        debug!(device = %self.device, "console write <password>");
        self.cursor = self.transcript.len();
        self.write_raw(secret)
    }

    /// Read one chunk; returns whether any bytes arrived
    fn pump(&mut self, deadline: Deadline) -> Result<bool, RunError> {
        let wait = deadline.clamp(self.options.timing.chunk_timeout);
        if wait.is_zero() {
            return Ok(false);
        }
        let chunk = self.stream.read_available(wait)?;
        if chunk.is_empty() {
            return Ok(false);
        }
        let text = String::from_utf8_lossy(&chunk);
        debug!(device = %self.device, bytes = chunk.len(), "console read");
        self.append(&text);
        Ok(true)
    }

    /// Listen for up to `window` (bounded by `deadline`), returning early once
    /// the fresh output contains a recognizable prompt.
    fn listen(&mut self, window: Duration, deadline: Deadline) -> Result<bool, RunError> {
        let until = deadline.within(window);
        let mut got_any = false;
        while !until.is_expired() {
            if self.pump(until)? {
                got_any = true;
                if self.matcher.classify(self.tail()).is_some() {
                    break;
                }
            }
        }
        Ok(got_any)
    }

    fn fail_alive(&mut self, detail: &str) -> RunError {
        self.enter(ConsoleState::AliveNoShell, detail);
        RunError::AliveNoShell {
            device: self.device.clone(),
            detail: detail.to_string(),
            transcript: self.transcript.clone(),
        }
    }

    fn fail_silent(&mut self, detail: &str) -> RunError {
        self.enter(ConsoleState::NoTerminal, detail);
        RunError::NoTerminal {
            device: self.device.clone(),
            detail: detail.to_string(),
            transcript: self.transcript.clone(),
        }
    }

    /// Bring the console to a shell prompt before `deadline`.
    ///
    /// Answers at most `max_login_attempts` login and password prompts.
    /// Consecutive silent probe windows reaching the silence cap end the
    /// attempt as `NoTerminal`, whatever was printed before. A console that
    /// keeps talking without offering a prompt until `deadline` is
    /// `AliveNoShell`.
    pub fn wake(&mut self, deadline: Deadline) -> Result<(), RunError> {
        if self.machine.state() == ConsoleState::Probing {
            self.enter(ConsoleState::Waking, "probe");
        }

        let timing = self.options.timing.clone();
        let mut silent_windows = 0u32;

        loop {
            match self.matcher.classify(self.tail()) {
                Some(PromptKind::Shell) => {
                    self.enter(ConsoleState::Ready, "shell prompt");
                    return Ok(());
                }
                Some(PromptKind::Password) => {
                    let Some(password) = self.options.password.clone().filter(|p| !p.is_empty())
                    else {
                        return Err(self.fail_alive("password prompt but no password configured"));
                    };
                    if self.machine.passwords_sent() >= timing.max_login_attempts {
                        return Err(self.fail_alive("password rejected"));
                    }
                    self.enter(ConsoleState::Password, "password prompt");
                    self.send_secret(&password)?;
                    self.listen(timing.password_wait, deadline)?;
                    continue;
                }
                Some(PromptKind::Login) => {
                    let Some(username) = self.options.username.clone().filter(|u| !u.is_empty())
                    else {
                        return Err(self.fail_alive("login prompt but no username configured"));
                    };
                    if self.machine.usernames_sent() >= timing.max_login_attempts {
                        return Err(self.fail_alive("login prompt repeated after login attempts"));
                    }
                    self.enter(ConsoleState::Login, "login prompt");
                    self.write_line(&username)?;
                    self.listen(timing.login_wait, deadline)?;
                    continue;
                }
                None => {}
            }

            if deadline.is_expired() {
                break;
            }

            self.write_line("")?;
            if self.listen(timing.probe_window, deadline)? {
                silent_windows = 0;
            } else {
                silent_windows += 1;
                debug!(device = %self.device, silent_windows, "no console output");
                if silent_windows >= timing.silence_cap {
                    return Err(
                        self.fail_silent("no output after waking; connection appears inactive")
                    );
                }
            }
        }

        if self.transcript.trim().is_empty() {
            return Err(self.fail_silent("no output before deadline; connection appears inactive"));
        }
        Err(self.fail_alive("console output but no shell prompt before deadline"))
    }

    /// Classify this device without running anything on it
    pub fn probe(&mut self, deadline: Deadline) -> PortProbeResult {
        let state = match self.wake(deadline) {
            Ok(()) => {
                self.enter(ConsoleState::Shell, "probe verdict");
                ProbeState::Shell
            }
            Err(RunError::NoTerminal { .. }) => ProbeState::NoTerminal,
            Err(RunError::AliveNoShell { .. }) => ProbeState::AliveNoShell,
            Err(e) => {
                warn!(device = %self.device, "probe failed: {e}");
                let mut result =
                    PortProbeResult::new(&self.device, e.to_string(), ProbeState::NoTerminal);
                if !self.transcript.is_empty() {
                    result.transcript = format!("{}\n{}", self.transcript, result.transcript);
                }
                return result;
            }
        };
        PortProbeResult::new(&self.device, self.transcript.clone(), state)
    }

    /// Confirm the shell executes input by echoing a ready marker
    pub fn sync(&mut self, deadline: Deadline) -> Result<(), RunError> {
        let marker = Marker::new(MarkerKind::Ready);
        self.write_line(&marker.echo_command())?;

        while marker.find(self.tail()).is_none() {
            if deadline.is_expired() {
                return Err(RunError::SyncFailed {
                    device: self.device.clone(),
                    transcript: self.tail().to_string(),
                });
            }
            self.pump(deadline)?;
        }
        debug!(device = %self.device, "ready marker synchronized");
        Ok(())
    }

    /// Check that the shell is a Linux one
    pub fn verify_linux(&mut self, check: &LinuxCheck, deadline: Deadline) -> Result<(), RunError> {
        let expected = compile(&check.expect_regex)
            .map_err(|e| RunError::Config(format!("invalid linux check regex: {e}")))?;
        let result = self.run_command(&check.command, deadline)?;

        if result.timed_out {
            return Err(self.fail_alive(&format!("`{}` did not complete", check.command)));
        }
        if !expected.is_match(&result.output) {
            return Err(self.fail_alive(&format!(
                "`{}` output did not match {}",
                check.command, check.expect_regex
            )));
        }
        Ok(())
    }

    /// Run one command; the marker echo reports its exit status.
    ///
    /// A missing marker at `deadline` yields a timed-out result rather than an
    /// error, leaving the decision to the batch policy.
    pub fn run_command(
        &mut self,
        command: &str,
        deadline: Deadline,
    ) -> Result<CommandOutput, RunError> {
        if !self.machine.state().can_run() {
            return Err(RunError::ShellNotReached {
                device: self.device.clone(),
                transcript: self.transcript.clone(),
            });
        }
        self.enter(ConsoleState::Running, "command");

        let marker = Marker::new(MarkerKind::Done);
        let echo = marker.echo_command();
        self.write_line(command)?;
        self.write_raw(&echo)?;

        loop {
            if let Some((end, status)) = marker.find(self.tail()) {
                let output = clean_output(&self.tail()[..end], command, &echo);
                self.enter(ConsoleState::Ready, "marker");
                return Ok(CommandOutput::completed(output, status));
            }
            if deadline.is_expired() {
                let output = clean_output(self.tail(), command, &echo);
                self.enter(ConsoleState::Ready, "command deadline");
                return Ok(CommandOutput::timed_out(output));
            }
            self.pump(deadline)?;
        }
    }

    /// Mark the session finished
    pub fn finish(&mut self) {
        if !self.machine.state().is_terminal() {
            self.enter(ConsoleState::Done, "finished");
        }
    }
}

/// Strip terminal noise from captured command output: ANSI sequences, the
/// echoed command line, the echoed marker line and blank edges.
fn clean_output(raw: &str, command: &str, echo: &str) -> String {
    let text = strip_ansi(raw);
    let command = command.trim();
    let mut command_echo_seen = command.is_empty();
    let mut kept: Vec<&str> = Vec::new();

    for line in text.split('\n').map(|l| l.trim_end_matches('\r')) {
        if line.contains(echo) {
            continue;
        }
        if !command_echo_seen && kept.is_empty() {
            if line.trim_end().ends_with(command) {
                command_echo_seen = true;
                continue;
            }
            if line.trim().is_empty() {
                continue;
            }
        }
        kept.push(line);
    }

    while kept.last().is_some_and(|l| l.trim().is_empty()) {
        kept.pop();
    }
    kept.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    /// Splits one scripted reply into separate reads
    const CHUNK_BREAK: char = '\u{0}';

    /// What the scripted console does after a write
    type Reply = Box<dyn FnMut(&str) -> Option<String> + Send>;

    /// In-memory console: every write is recorded and may queue a reply.
    struct ScriptedStream {
        pending: VecDeque<Bytes>,
        writes: Arc<Mutex<Vec<String>>>,
        reply: Reply,
    }

    impl ScriptedStream {
        fn new(initial: &str, reply: Reply) -> (Self, Arc<Mutex<Vec<String>>>) {
            let writes = Arc::new(Mutex::new(Vec::new()));
            let mut pending = VecDeque::new();
            if !initial.is_empty() {
                pending.push_back(Bytes::from(initial.to_string()));
            }
            (
                Self {
                    pending,
                    writes: Arc::clone(&writes),
                    reply,
                },
                writes,
            )
        }
    }

    impl ConsoleStream for ScriptedStream {
        fn write(&mut self, data: &[u8]) -> Result<(), RunError> {
            let text = String::from_utf8_lossy(data).into_owned();
            self.writes.lock().unwrap().push(text.clone());
            if let Some(out) = (self.reply)(&text) {
                for chunk in out.split(CHUNK_BREAK) {
                    self.pending.push_back(Bytes::from(chunk.to_string()));
                }
            }
            Ok(())
        }

        fn read_available(&mut self, chunk_timeout: Duration) -> Result<Bytes, RunError> {
            match self.pending.pop_front() {
                Some(chunk) => Ok(chunk),
                None => {
                    std::thread::sleep(chunk_timeout.min(Duration::from_millis(5)));
                    Ok(Bytes::new())
                }
            }
        }

        fn flush_buffers(&mut self) -> Result<(), RunError> {
            Ok(())
        }
    }

    fn fast_timing() -> SessionTiming {
        SessionTiming {
            probe_window: Duration::from_millis(40),
            chunk_timeout: Duration::from_millis(10),
            login_wait: Duration::from_millis(100),
            password_wait: Duration::from_millis(100),
            ..SessionTiming::default()
        }
    }

    fn options(username: Option<&str>, password: Option<&str>) -> SessionOptions {
        SessionOptions {
            line_ending: LineEnding::Cr,
            username: username.map(String::from),
            password: password.map(String::from),
            timing: fast_timing(),
        }
    }

    fn matcher() -> PromptMatcher {
        PromptMatcher::new(r"(?:nvidia@nvidia:.*[$#]|[$#]) ?$").unwrap()
    }

    /// A shell that echoes input and evaluates the marker echo line
    fn shell_reply(prompt: &'static str, status: i32) -> Reply {
        Box::new(move |line: &str| {
            let typed = line.trim_end_matches(&['\r', '\n'][..]);
            if let Some(rest) = typed.strip_prefix("echo \"") {
                let token = rest.replace("\"\"", "").replace(":$?\"", "");
                return Some(format!("{typed}\r\n{token}:{status}\r\n{prompt}"));
            }
            match typed {
                "" => Some(format!("\r\n{prompt}")),
                "uname -s" => Some(format!("{typed}\r\nLinux\r\n")),
                other => Some(format!("{other}\r\nout of {other}\r\n")),
            }
        })
    }

    #[test]
    fn test_shell_already_present_sends_no_credentials() {
        let (stream, writes) = ScriptedStream::new("", shell_reply("nvidia@nvidia:~$ ", 0));
        let opts = options(Some("nvidia"), Some("pw"));
        let mut session = ConsoleSession::probing(stream, "/dev/ttyUSB0", matcher(), opts);

        let result = session.probe(Deadline::after(Duration::from_secs(2)));
        assert_eq!(result.state, ProbeState::Shell);
        assert_eq!(session.machine().usernames_sent(), 0);
        assert_eq!(session.machine().passwords_sent(), 0);
        assert!(writes.lock().unwrap().iter().all(|w| w.trim().is_empty()));
    }

    #[test]
    fn test_login_then_password_reaches_ready() {
        let reply: Reply = Box::new(|line: &str| match line {
            "\r" => Some("\r\njetson login: ".to_string()),
            "nvidia\r" => Some("nvidia\r\nPassword: ".to_string()),
            "secret\r" => Some("\r\nWelcome\r\nnvidia@nvidia:~$ ".to_string()),
            _ => None,
        });
        let (stream, writes) = ScriptedStream::new("", reply);
        let opts = options(Some("nvidia"), Some("secret"));
        let mut session = ConsoleSession::new(stream, "/dev/ttyUSB0", matcher(), opts);

        session.wake(Deadline::after(Duration::from_secs(2))).unwrap();
        assert_eq!(session.machine().state(), ConsoleState::Ready);
        assert_eq!(session.machine().usernames_sent(), 1);
        assert_eq!(session.machine().passwords_sent(), 1);

        let writes = writes.lock().unwrap();
        assert_eq!(writes.iter().filter(|w| w.as_str() == "nvidia\r").count(), 1);
        assert_eq!(writes.iter().filter(|w| w.as_str() == "secret\r").count(), 1);
    }

    #[test]
    fn test_silent_console_is_no_terminal_before_deadline() {
        let (stream, _) = ScriptedStream::new("", Box::new(|_: &str| None));
        let mut session =
            ConsoleSession::new(stream, "/dev/ttyUSB0", matcher(), options(Some("u"), Some("p")));

        let started = Instant::now();
        let err = session.wake(Deadline::after(Duration::from_secs(5))).unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        match err {
            RunError::NoTerminal { detail, .. } => {
                assert!(detail.contains("connection appears inactive"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(session.machine().state(), ConsoleState::NoTerminal);
    }

    #[test]
    fn test_login_without_username_is_alive_no_shell() {
        let (stream, _) = ScriptedStream::new("\r\nlogin: ", Box::new(|_: &str| None));
        let mut session =
            ConsoleSession::new(stream, "/dev/ttyUSB0", matcher(), options(None, None));
        session.pump(Deadline::after(Duration::from_secs(1))).unwrap();

        let err = session.wake(Deadline::after(Duration::from_secs(1))).unwrap_err();
        assert!(matches!(err, RunError::AliveNoShell { .. }));
    }

    #[test]
    fn test_rejected_login_is_bounded() {
        let reply: Reply = Box::new(|line: &str| match line {
            "\r" => Some("\r\nlogin: ".to_string()),
            "nvidia\r" => Some("nvidia\r\nPassword: ".to_string()),
            _ => Some("\r\nLogin incorrect\r\nlogin: ".to_string()),
        });
        let (stream, writes) = ScriptedStream::new("", reply);
        let opts = options(Some("nvidia"), Some("wrong"));
        let mut session = ConsoleSession::new(stream, "/dev/ttyUSB0", matcher(), opts);

        let err = session.wake(Deadline::after(Duration::from_secs(3))).unwrap_err();
        assert!(matches!(err, RunError::AliveNoShell { .. }));
        let writes = writes.lock().unwrap();
        assert_eq!(writes.iter().filter(|w| w.as_str() == "nvidia\r").count(), 2);
    }

    #[test]
    fn test_chatty_console_without_prompt_is_alive_no_shell() {
        let reply: Reply = Box::new(|_: &str| Some("[  12.345] booting...\r\n".to_string()));
        let (stream, _) = ScriptedStream::new("", reply);
        let mut session =
            ConsoleSession::new(stream, "/dev/ttyUSB0", matcher(), options(Some("u"), Some("p")));

        let err = session.wake(Deadline::after(Duration::from_millis(300))).unwrap_err();
        assert!(matches!(err, RunError::AliveNoShell { .. }));
        assert_eq!(err.exit_code(), 13);
        assert!(err.transcript().unwrap().contains("booting"));
        assert_eq!(session.machine().state(), ConsoleState::AliveNoShell);
    }

    #[test]
    fn test_output_then_silence_is_no_terminal() {
        let mut answered = false;
        let reply: Reply = Box::new(move |_: &str| {
            if answered {
                return None;
            }
            answered = true;
            Some("U-Boot 2020.04\r\n".to_string())
        });
        let (stream, _) = ScriptedStream::new("", reply);
        let mut session =
            ConsoleSession::new(stream, "/dev/ttyUSB0", matcher(), options(Some("u"), Some("p")));

        let err = session.wake(Deadline::after(Duration::from_secs(5))).unwrap_err();
        match err {
            RunError::NoTerminal { ref detail, ref transcript, .. } => {
                assert!(detail.contains("connection appears inactive"));
                assert!(transcript.contains("U-Boot"));
            }
            ref other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.exit_code(), 12);
    }

    #[test]
    fn test_marker_split_across_reads_keeps_status() {
        let reply: Reply = Box::new(|line: &str| {
            let typed = line.trim_end_matches('\r');
            if let Some(rest) = typed.strip_prefix("echo \"") {
                let token = rest.replace("\"\"", "").replace(":$?\"", "");
                return Some(format!("boom\r\n{token}{CHUNK_BREAK}:3\r\n# "));
            }
            match typed {
                "" => Some("\r\n# ".to_string()),
                _ => None,
            }
        });
        let (stream, _) = ScriptedStream::new("", reply);
        let mut session =
            ConsoleSession::new(stream, "/dev/ttyACM0", matcher(), options(None, None));
        let deadline = Deadline::after(Duration::from_secs(1));
        session.wake(deadline).unwrap();

        let out = session.run_command("false", deadline).unwrap();
        assert!(!out.timed_out);
        assert_eq!(out.exit_status, Some(3));
        assert_eq!(out.output, "boom");
    }

    #[test]
    fn test_sync_and_run_command_capture_output_and_status() {
        let (stream, _) = ScriptedStream::new("", shell_reply("# ", 3));
        let mut session =
            ConsoleSession::new(stream, "/dev/ttyACM0", matcher(), options(None, None));

        let deadline = Deadline::after(Duration::from_secs(2));
        session.wake(deadline).unwrap();
        session.sync(deadline).unwrap();

        let result = session.run_command("ls /tmp", deadline).unwrap();
        assert!(!result.timed_out);
        assert_eq!(result.exit_status, Some(3));
        assert_eq!(result.output, "out of ls /tmp");
        assert_eq!(session.machine().state(), ConsoleState::Ready);

        session.verify_linux(&LinuxCheck::default(), deadline).unwrap();
        session.finish();
        assert_eq!(session.machine().state(), ConsoleState::Done);
    }

    #[test]
    fn test_missing_marker_times_out() {
        let reply: Reply = Box::new(|line: &str| match line {
            "\r" => Some("\r\n# ".to_string()),
            "sleep 100\r" => Some("sleep 100\r\n".to_string()),
            _ => None,
        });
        let (stream, _) = ScriptedStream::new("", reply);
        let mut session =
            ConsoleSession::new(stream, "/dev/ttyACM0", matcher(), options(None, None));
        session.wake(Deadline::after(Duration::from_secs(1))).unwrap();

        let result = session
            .run_command("sleep 100", Deadline::after(Duration::from_millis(100)))
            .unwrap();
        assert!(result.timed_out);
        assert_eq!(result.exit_status, None);
    }

    #[test]
    fn test_non_linux_shell_fails_verification() {
        let reply: Reply = Box::new(|line: &str| {
            let typed = line.trim_end_matches('\r');
            if let Some(rest) = typed.strip_prefix("echo \"") {
                let token = rest.replace("\"\"", "").replace(":$?\"", "");
                return Some(format!("{token}:0\r\n# "));
            }
            match typed {
                "" => Some("\r\n# ".to_string()),
                _ => Some("Darwin\r\n".to_string()),
            }
        });
        let (stream, _) = ScriptedStream::new("", reply);
        let mut session =
            ConsoleSession::new(stream, "/dev/ttyACM0", matcher(), options(None, None));
        let deadline = Deadline::after(Duration::from_secs(1));
        session.wake(deadline).unwrap();

        let err = session.verify_linux(&LinuxCheck::default(), deadline).unwrap_err();
        assert!(matches!(err, RunError::AliveNoShell { .. }));
    }

    #[test]
    fn test_commands_refused_before_wake() {
        let (stream, writes) = ScriptedStream::new("", Box::new(|_: &str| None));
        let mut session =
            ConsoleSession::new(stream, "/dev/ttyACM0", matcher(), options(None, None));

        let err = session.run_command("true", Deadline::never()).unwrap_err();
        assert!(matches!(err, RunError::ShellNotReached { .. }));
        assert!(writes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_transcript_is_capped() {
        let (stream, _) = ScriptedStream::new("", Box::new(|_: &str| None));
        let mut opts = options(None, None);
        opts.timing.max_buffer_chars = 16;
        let mut session = ConsoleSession::new(stream, "/dev/x", matcher(), opts);
        session.append("0123456789");
        session.append("abcdefghij");
        assert_eq!(session.transcript(), "456789abcdefghij");
    }

    #[test]
    fn test_clean_output() {
        let echo = "echo \"__TERMRUNNER\"\"_DONE_1_2__:$?\"";
        let raw = format!("\x1b[0m# ls /tmp\r\na\r\nb\r\n# {echo}\r\n");
        assert_eq!(clean_output(&raw, "ls /tmp", echo), "a\nb");
        assert_eq!(clean_output("\r\n\r\n", "true", echo), "");
    }
}
