//! SSH transport implementation
//!
//! Password-only authentication (password, then keyboard-interactive answered
//! with the same password). Every command gets its own channel with a PTY so
//! `sudo` prompts show up in the output and can be answered.

use super::{CommandTransport, TransportKind};
use crate::config::RunnerConfig;
use crate::core::deadline::Deadline;
use crate::core::error::RunError;
use crate::core::result::CommandOutput;
use crate::core::transcript::Transcript;
use regex::Regex;
use ssh2::{ErrorCode, Session};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

/// `LIBSSH2_ERROR_TIMEOUT`
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;
/// `LIBSSH2_ERROR_AUTHENTICATION_FAILED`
const LIBSSH2_ERROR_AUTHENTICATION_FAILED: i32 = -18;
/// `LIBSSH2_ERROR_SOCKET_TIMEOUT`
const LIBSSH2_ERROR_SOCKET_TIMEOUT: i32 = -30;

/// Sleep between polls when a channel had nothing to read
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Longest wait for the channel to close after EOF
const CLOSE_WAIT: Duration = Duration::from_secs(5);

/// Only the end of the output is scanned for password prompts
const SUDO_SCAN_CHARS: usize = 4000;

fn sudo_prompt() -> &'static Regex {
    static SUDO: OnceLock<Regex> = OnceLock::new();
    SUDO.get_or_init(|| {
        Regex::new(concat!(
            r"(?im)(\[sudo\]\s+password\s+for\s+[^:]+:",
            r"|password\s+for\s+[^:]+:",
            r"|\r?\nPassword:\s*$)"
        ))
        .expect("valid sudo prompt regex")
    })
}

/// Whether the end of `output` asks for a password
pub fn needs_sudo_password(output: &str) -> bool {
    let mut start = output.len().saturating_sub(SUDO_SCAN_CHARS);
    while !output.is_char_boundary(start) {
        start += 1;
    }
    sudo_prompt().is_match(&output[start..])
}

/// Answers every keyboard-interactive prompt with the password
struct PasswordPrompter<'p> {
    password: &'p str,
}

impl ssh2::KeyboardInteractivePrompt for PasswordPrompter<'_> {
    fn prompt<'a>(
        &mut self,
        _username: &str,
        _instructions: &str,
        prompts: &[ssh2::Prompt<'a>],
    ) -> Vec<String> {
        prompts.iter().map(|_| self.password.to_string()).collect()
    }
}

fn is_timeout_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("timed out") || lower.contains("timeout")
}

/// Map an `ssh2` error from connect/handshake/auth to a run error
fn classify(target: &str, err: &ssh2::Error) -> RunError {
    let reason = err.to_string();
    let (auth, timed_out) = match err.code() {
        ErrorCode::Session(LIBSSH2_ERROR_AUTHENTICATION_FAILED) => (true, false),
        ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT | LIBSSH2_ERROR_SOCKET_TIMEOUT) => (false, true),
        _ => (
            reason.to_lowercase().contains("authentication failed"),
            is_timeout_message(&reason),
        ),
    };

    if auth {
        RunError::AuthFailure {
            target: target.to_string(),
            reason,
        }
    } else {
        RunError::SshUnreachable {
            target: target.to_string(),
            reason,
            timed_out,
        }
    }
}

fn channel_error(context: &str, err: impl std::fmt::Display) -> RunError {
    RunError::Channel(format!("{context}: {err}"))
}

/// Clamp a duration to libssh2's millisecond `u32` timeout, at least 1 ms
fn timeout_ms(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX).max(1)
}

/// Session timeout for `wait_close`, bounded by the command deadline
fn close_timeout_ms(deadline: Deadline) -> u32 {
    timeout_ms(deadline.clamp(CLOSE_WAIT))
}

/// SSH command executor using ssh2 crate (libssh2 bindings)
pub struct SshExecutor {
    config: RunnerConfig,
    session: Option<Session>,
}

impl SshExecutor {
    /// Create a new executor; nothing connects until `open`
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    fn resolve(&self, target: &str) -> Result<SocketAddr, RunError> {
        (self.config.ssh.host.as_str(), self.config.ssh.port)
            .to_socket_addrs()
            .map_err(|e| RunError::SshUnreachable {
                target: target.to_string(),
                reason: format!("cannot resolve host: {e}"),
                timed_out: false,
            })?
            .next()
            .ok_or_else(|| RunError::SshUnreachable {
                target: target.to_string(),
                reason: "host resolved to no addresses".to_string(),
                timed_out: false,
            })
    }

    /// TCP connect, handshake and authenticate within the connect timeout
    fn connect(&self, deadline: Deadline) -> Result<Session, RunError> {
        let target = self.config.ssh_target();
        let budget = deadline.clamp(self.config.ssh.connect_timeout);
        if budget.is_zero() {
            return Err(RunError::OverallTimeout);
        }

        let addr = self.resolve(&target)?;
        let tcp = TcpStream::connect_timeout(&addr, budget).map_err(|e| RunError::SshUnreachable {
            target: target.clone(),
            reason: e.to_string(),
            timed_out: matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ),
        })?;

        let mut session = Session::new().map_err(|e| classify(&target, &e))?;
        session.set_timeout(timeout_ms(budget));
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| classify(&target, &e))?;

        self.authenticate(&session, &target)?;
        debug!(target = %target, "ssh authenticated");
        Ok(session)
    }

    fn authenticate(&self, session: &Session, target: &str) -> Result<(), RunError> {
        let username = &self.config.credentials.username;
        let password = &self.config.credentials.password;

        if let Err(e) = session.userauth_password(username, password) {
            let failure = classify(target, &e);
            if failure.is_ssh_timeout() {
                return Err(failure);
            }
            debug!(target = %target, "password auth rejected, trying keyboard-interactive");
            let mut prompter = PasswordPrompter { password };
            if session
                .userauth_keyboard_interactive(username, &mut prompter)
                .is_err()
            {
                return Err(match failure {
                    RunError::SshUnreachable { reason, .. } if !session.authenticated() => {
                        RunError::AuthFailure {
                            target: target.to_string(),
                            reason,
                        }
                    }
                    other => other,
                });
            }
        }

        if !session.authenticated() {
            return Err(RunError::AuthFailure {
                target: target.to_string(),
                reason: "Authentication failed".to_string(),
            });
        }
        Ok(())
    }
}

impl CommandTransport for SshExecutor {
    fn kind(&self) -> TransportKind {
        TransportKind::Ssh
    }

    fn open(&mut self, deadline: Deadline, transcript: &mut Transcript) -> Result<(), RunError> {
        let session = self.connect(deadline)?;
        info!(target = %self.config.ssh_target(), "ssh connected");
        transcript.note(&format!("connected via ssh to {}", self.config.ssh_target()));
        self.session = Some(session);
        Ok(())
    }

    fn run_command(
        &mut self,
        command: &str,
        deadline: Deadline,
    ) -> Result<CommandOutput, RunError> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| RunError::Channel("not connected".to_string()))?;

        session.set_blocking(true);
        let mut channel = session
            .channel_session()
            .map_err(|e| channel_error("channel open failed", e))?;
        channel
            .request_pty("xterm", None, None)
            .map_err(|e| channel_error("PTY request failed", e))?;
        channel
            .exec(command)
            .map_err(|e| channel_error("exec failed", e))?;
        session.set_blocking(false);

        let mut combined = String::new();
        let mut password_sent = false;
        let mut buffer = vec![0u8; 8192];

        loop {
            let mut progressed = false;

            for stream_id in [0, ssh2::EXTENDED_DATA_STDERR] {
                match channel.stream(stream_id).read(&mut buffer) {
                    Ok(0) => {}
                    Ok(n) => {
                        combined.push_str(&String::from_utf8_lossy(&buffer[..n]));
                        progressed = true;
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(e) => {
                        session.set_blocking(true);
                        return Err(channel_error("read failed", e));
                    }
                }
            }

            if !password_sent && needs_sudo_password(&combined) {
                debug!("answering password prompt");
                session.set_blocking(true);
                let answer = format!("{}\n", self.config.credentials.password);
                channel
                    .write_all(answer.as_bytes())
                    .and_then(|()| channel.flush())
                    .map_err(|e| channel_error("password write failed", e))?;
                session.set_blocking(false);
                password_sent = true;
            }

            if channel.eof() {
                break;
            }

            if deadline.is_expired() {
                warn!(command, "ssh command timed out");
                session.set_blocking(true);
                let _ = channel.close();
                return Ok(CommandOutput::timed_out(combined));
            }

            if !progressed {
                std::thread::sleep(deadline.clamp(POLL_INTERVAL));
            }
        }

        session.set_blocking(true);
        let session_timeout = session.timeout();
        session.set_timeout(close_timeout_ms(deadline));
        if let Err(e) = channel.wait_close() {
            debug!("wait_close failed: {e}");
        }
        session.set_timeout(session_timeout);
        let status = channel.exit_status().ok();
        Ok(CommandOutput::completed(combined, status))
    }

    fn close(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = session.disconnect(None, "done", None);
        }
    }
}

impl Drop for SshExecutor {
    fn drop(&mut self) {
        self.close();
    }
}
