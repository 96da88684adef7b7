//! Wall-clock deadlines
//!
//! A run has one overall deadline; every wait in the engine derives its own
//! deadline from it so the overall budget always dominates.

use std::time::{Duration, Instant};

/// Point in time after which an operation must stop waiting.
///
/// `Deadline::never()` is the "no limit" deadline used when a configured
/// timeout is zero or negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// Deadline that never expires
    pub fn never() -> Self {
        Self { at: None }
    }

    /// Deadline `timeout` from now
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Some(Instant::now() + timeout),
        }
    }

    /// Deadline from an optional limit; `None` means no limit
    pub fn from_limit(limit: Option<Duration>) -> Self {
        limit.map_or_else(Self::never, Self::after)
    }

    /// Whether the deadline has passed
    pub fn is_expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left, `None` when unlimited
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Whether this deadline is unlimited
    pub fn is_unlimited(&self) -> bool {
        self.at.is_none()
    }

    /// The earlier of two deadlines
    #[must_use]
    pub fn min(self, other: Self) -> Self {
        match (self.at, other.at) {
            (Some(a), Some(b)) => Self { at: Some(a.min(b)) },
            (Some(_), None) => self,
            (None, _) => other,
        }
    }

    /// This deadline, but no later than `window` from now
    #[must_use]
    pub fn within(self, window: Duration) -> Self {
        self.min(Self::after(window))
    }

    /// Clamp a wait so it never sleeps past the deadline
    pub fn clamp(&self, wait: Duration) -> Duration {
        self.remaining().map_or(wait, |left| wait.min(left))
    }
}

/// Convert a seconds value where `<= 0` means "no limit"
pub fn limit_from_secs(secs: f64) -> Option<Duration> {
    if secs.is_finite() && secs > 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}
