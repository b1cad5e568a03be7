use std::fmt;

/// Highest exit code a program can report by exiting normally.
const MAX_EXIT_CODE: i32 = 255;

/// Exit status of a stopped child, as a single non-negative integer.
///
/// A normal exit yields the program's exit code (0..=255). On POSIX, a child terminated by a
/// signal yields 255 + the signal number. Forcibly killing a child on Windows makes it exit
/// with [`ExitStatus::SIGKILL`] so callers observe the same value on every platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExitStatus(i32);

impl ExitStatus {
    /// Status of a child killed by `SIGKILL` (or forcibly killed on Windows).
    pub const SIGKILL: Self = Self(MAX_EXIT_CODE + 9);

    /// Status of a child terminated by `SIGTERM`.
    pub const SIGTERM: Self = Self(MAX_EXIT_CODE + 15);

    /// Status of a child that exited with the given code.
    pub const fn from_code(code: i32) -> Self {
        Self(code)
    }

    /// Status of a child terminated by the given signal number.
    pub const fn from_signal(signal: i32) -> Self {
        Self(MAX_EXIT_CODE + signal)
    }

    /// Status of a child that exited with a raw Windows exit code. A console break ends the
    /// child with `STATUS_CONTROL_C_EXIT`, reported as [`ExitStatus::SIGTERM`]; other NTSTATUS
    /// values too large for the status range are clamped to `i32::MAX`.
    #[cfg_attr(not(windows), allow(dead_code))]
    pub(crate) fn from_windows_code(code: u32) -> Self {
        const STATUS_CONTROL_C_EXIT: u32 = 0xC000_013A;

        if code == STATUS_CONTROL_C_EXIT {
            Self::SIGTERM
        } else {
            Self(i32::try_from(code).unwrap_or(i32::MAX))
        }
    }

    /// The status as a single integer.
    pub const fn code(self) -> i32 {
        self.0
    }

    /// Whether the child exited normally with code 0.
    pub const fn success(self) -> bool {
        self.0 == 0
    }

    /// The terminating signal number, if the status encodes one.
    pub const fn signal(self) -> Option<i32> {
        if self.0 > MAX_EXIT_CODE {
            Some(self.0 - MAX_EXIT_CODE)
        } else {
            None
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.signal() {
            Some(signal) => write!(f, "terminated by signal {signal}"),
            None => write!(f, "exit code {}", self.0),
        }
    }
}
