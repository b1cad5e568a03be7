//! Timeouts, deadlines and their composition.

use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// How long a wait may block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Timeout {
    /// Block until the awaited condition occurs.
    #[default]
    Infinite,
    /// Block until the process's overall deadline expires (or forever, if none was set).
    Deadline,
    /// Block for at most the given duration. A zero duration polls without blocking.
    After(Duration),
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Self::After(duration)
    }
}

impl Timeout {
    /// Resolves this timeout into a bound on blocking, relative to now; `None` is
    /// unbounded.
    pub(crate) fn resolve(self, deadline: Option<Instant>) -> Option<Duration> {
        match self {
            Self::Infinite => None,
            Self::After(duration) => Some(duration),
            Self::Deadline => deadline.map(|at| at.saturating_duration_since(Instant::now())),
        }
    }
}

/// Computes how long a blocking primitive may wait: the smaller of the per-call timeout and
/// the time left until the deadline. `None` means "wait forever".
///
/// Fails with [`Error::TimedOut`] when the deadline has already passed, so callers don't
/// issue an OS call at all.
pub(crate) fn expiry(
    timeout: Option<Duration>,
    deadline: Option<Instant>,
) -> Result<Option<Duration>> {
    let remaining = match deadline {
        Some(at) => {
            let now = Instant::now();
            if now >= at {
                return Err(Error::TimedOut);
            }
            Some(at - now)
        }
        None => None,
    };

    Ok(match (timeout, remaining) {
        (Some(timeout), Some(remaining)) => Some(timeout.min(remaining)),
        (timeout, None) => timeout,
        (None, remaining) => remaining,
    })
}

/// Tracks a bound across several retries of the same blocking operation.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Countdown {
    end: Option<Instant>,
}

impl Countdown {
    pub fn new(limit: Option<Duration>) -> Self {
        // A bound too large to represent is treated as unbounded.
        let end = limit.and_then(|limit| Instant::now().checked_add(limit));
        Self { end }
    }

    /// Time left before expiry; `None` if unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.end.map(|end| end.saturating_duration_since(Instant::now()))
    }

    pub fn expired(&self) -> bool {
        self.end.is_some_and(|end| Instant::now() >= end)
    }
}
