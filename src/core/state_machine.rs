//! Console State Machine
//!
//! Tracks where a serial console session is in the wake/login sequence and
//! keeps a timestamped history of transitions for diagnostics.
//!
//! Discovery runs `Probing → … → {Shell, AliveNoShell, NoTerminal}`; a
//! confirmed session runs `Waking → Login → Password → Ready → Running → Done`.
//! Entering `Login` means a username was sent, entering `Password` means a
//! password was sent, so the credential counters fall out of the history.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Console session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleState {
    /// Discovery of a candidate device
    Probing,
    /// Sending empty lines and waiting for any output
    Waking,
    /// Username sent in answer to a login prompt
    Login,
    /// Password sent in answer to a password prompt
    Password,
    /// Shell prompt seen
    Ready,
    /// A command is in flight
    Running,
    /// Session finished
    Done,
    /// Probe verdict: a shell is available
    Shell,
    /// Device answers but offers no usable shell
    AliveNoShell,
    /// Device never produced a byte
    NoTerminal,
}

impl ConsoleState {
    /// Check if state is a verdict that ends the wake sequence
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Shell | Self::AliveNoShell | Self::NoTerminal)
    }

    /// Check if commands may be written
    pub fn can_run(&self) -> bool {
        matches!(self, Self::Ready | Self::Running)
    }
}

impl fmt::Display for ConsoleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Probing => "probing",
            Self::Waking => "waking",
            Self::Login => "login",
            Self::Password => "password",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Done => "done",
            Self::Shell => "shell",
            Self::AliveNoShell => "alive_no_shell",
            Self::NoTerminal => "no_terminal",
        };
        f.write_str(name)
    }
}

/// State transition event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    /// Previous state
    pub from: ConsoleState,
    /// New state
    pub to: ConsoleState,
    /// Timestamp
    pub timestamp: DateTime<Local>,
    /// Reason for transition
    pub reason: Option<String>,
}

/// Console state machine
#[derive(Debug)]
pub struct ConsoleStateMachine {
    state: ConsoleState,
    history: Vec<StateTransition>,
    max_history: usize,
    usernames_sent: u32,
    passwords_sent: u32,
}

impl ConsoleStateMachine {
    /// Create a state machine for a confirmed session
    pub fn new() -> Self {
        Self::starting_at(ConsoleState::Waking)
    }

    /// Create a state machine for probing a candidate device
    pub fn probing() -> Self {
        Self::starting_at(ConsoleState::Probing)
    }

    fn starting_at(state: ConsoleState) -> Self {
        Self {
            state,
            history: Vec::new(),
            max_history: 100,
            usernames_sent: 0,
            passwords_sent: 0,
        }
    }

    /// Get current state
    pub fn state(&self) -> ConsoleState {
        self.state
    }

    /// Get state history
    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// Number of usernames sent so far
    pub fn usernames_sent(&self) -> u32 {
        self.usernames_sent
    }

    /// Number of passwords sent so far
    pub fn passwords_sent(&self) -> u32 {
        self.passwords_sent
    }

    /// Transition to a new state
    pub fn transition(&mut self, new_state: ConsoleState, reason: &str) -> Result<(), String> {
        if !self.is_valid_transition(new_state) {
            return Err(format!(
                "Invalid transition from {:?} to {:?}",
                self.state, new_state
            ));
        }

        debug!(from = %self.state, to = %new_state, reason, "console transition");

        self.history.push(StateTransition {
            from: self.state,
            to: new_state,
            timestamp: Local::now(),
            reason: Some(reason.to_string()),
        });
        if self.history.len() > self.max_history {
            self.history.remove(0);
        }

        match new_state {
            ConsoleState::Login => self.usernames_sent += 1,
            ConsoleState::Password => self.passwords_sent += 1,
            _ => {}
        }

        self.state = new_state;
        Ok(())
    }

    /// Check if transition is valid
    fn is_valid_transition(&self, new_state: ConsoleState) -> bool {
        use ConsoleState::*;

        match (self.state, new_state) {
            // Discovery
            (Probing, Waking | NoTerminal) => true,

            // Wake and login sequence
            (Waking | Login | Password, Login | Password | Ready) => true,
            (Waking | Login | Password, AliveNoShell | NoTerminal) => true,

            // Confirmed shell
            (Ready, Shell | Running | Done | AliveNoShell) => true,
            (Running, Ready | Done) => true,

            _ => false,
        }
    }

    /// Text rendering of the transition history
    pub fn describe(&self) -> String {
        self.history
            .iter()
            .map(|t| format!("{} -> {}", t.from, t.to))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Default for ConsoleStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
