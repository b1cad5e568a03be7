//! Escalating shutdown of a child process.

use crate::error::{Error, Result};
use crate::process::Process;
use crate::status::ExitStatus;
use crate::timing::Timeout;
use crate::trace_categories;

/// What a single stop step does before waiting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Stop {
    /// Skip the step entirely.
    #[default]
    Noop,
    /// Only wait for the child to exit.
    Wait,
    /// Ask the child to exit (`SIGTERM` on POSIX, a console break on Windows), then wait.
    Terminate,
    /// Forcibly stop the child (`SIGKILL` on POSIX, `TerminateProcess` on Windows), then wait.
    Kill,
}

/// One step of a stop sequence: an action and how long to wait for the child to exit
/// afterwards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct StopAction {
    /// The action taken.
    pub action: Stop,
    /// How long to wait for exit after the action.
    pub timeout: Timeout,
}

impl StopAction {
    /// A step that does nothing.
    pub const fn noop() -> Self {
        Self {
            action: Stop::Noop,
            timeout: Timeout::Infinite,
        }
    }

    /// A step that waits for exit for at most `timeout`.
    pub const fn wait(timeout: Timeout) -> Self {
        Self {
            action: Stop::Wait,
            timeout,
        }
    }

    /// A step that requests termination and then waits for at most `timeout`.
    pub const fn terminate(timeout: Timeout) -> Self {
        Self {
            action: Stop::Terminate,
            timeout,
        }
    }

    /// A step that kills the child and then waits for at most `timeout`.
    pub const fn kill(timeout: Timeout) -> Self {
        Self {
            action: Stop::Kill,
            timeout,
        }
    }
}

/// An ordered sequence of up to three stop steps.
///
/// The default sequence waits until the process's deadline, then requests termination and
/// waits for as long as it takes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StopActions([StopAction; 3]);

impl StopActions {
    /// Most steps a sequence can hold.
    pub const MAX_STEPS: usize = 3;

    /// Creates a sequence from exactly three steps; use [`StopAction::noop`] for unused ones.
    pub const fn new(steps: [StopAction; 3]) -> Self {
        Self(steps)
    }

    /// Creates a sequence from at most [`StopActions::MAX_STEPS`] steps.
    pub fn from_steps(steps: &[StopAction]) -> Result<Self> {
        if steps.len() > Self::MAX_STEPS {
            return Err(Error::InvalidArgument);
        }

        let mut sequence = [StopAction::noop(); 3];
        sequence[..steps.len()].copy_from_slice(steps);
        Ok(Self(sequence))
    }

    /// The steps, in order.
    pub const fn steps(&self) -> &[StopAction; 3] {
        &self.0
    }

    fn is_noop(&self) -> bool {
        self.0.iter().all(|step| step.action == Stop::Noop)
    }

    /// Replaces a sequence that would do nothing with the default one.
    pub(crate) fn or_default(self) -> Self {
        if self.is_noop() { Self::default() } else { self }
    }
}

impl Default for StopActions {
    fn default() -> Self {
        Self([
            StopAction::wait(Timeout::Deadline),
            StopAction::terminate(Timeout::Infinite),
            StopAction::noop(),
        ])
    }
}

impl Process {
    /// Runs a stop sequence.
    ///
    /// Each step issues its action, if any, and then waits for the child with the step's
    /// timeout. The sequence ends as soon as the child has exited, returning its status. A
    /// step whose wait times out hands over to the next one, and [`Error::TimedOut`] is
    /// returned if the child outlives every step. A failure to deliver a termination or kill
    /// request aborts the sequence.
    pub fn stop(&self, actions: StopActions) -> Result<ExitStatus> {
        if let Some(status) = self.status() {
            return Ok(status);
        }

        let mut outcome = Err(Error::TimedOut);

        for step in actions.steps() {
            match step.action {
                Stop::Noop => continue,
                Stop::Wait => (),
                Stop::Terminate => self.terminate()?,
                Stop::Kill => self.kill()?,
            }

            tracing::debug!(
                target: trace_categories::STOP,
                "{:?}: waiting {:?} for exit",
                step.action,
                step.timeout
            );

            outcome = self.wait(step.timeout);
            if outcome != Err(Error::TimedOut) {
                break;
            }
        }

        if outcome == Err(Error::TimedOut) {
            tracing::warn!(target: trace_categories::STOP, "child outlived its stop sequence");
        }

        outcome
    }
}
