//! Unified error model.
//!
//! Every failure the engine reports maps onto a small, closed set of named
//! errors plus an opaque wrapper around raw OS codes. The same set can be
//! viewed as one signed integer space through [`Error::code`]: negative values
//! are errors, and the named sentinels are the negated platform codes for
//! invalid argument, broken pipe, timeout, out of memory and in-progress.

use crate::sys;

/// Monolithic error type for the engine.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Error {
    /// The options or arguments were invalid or contradictory, or the operation is not
    /// permitted in the process's current state.
    #[error("invalid argument")]
    InvalidArgument,

    /// The operation did not complete before its timeout or the process deadline expired.
    #[error("operation timed out")]
    TimedOut,

    /// The stream was closed by the peer (or has already been released).
    #[error("stream closed")]
    StreamClosed,

    /// Memory or another limited resource could not be allocated.
    #[error("out of memory")]
    OutOfMemory,

    /// The operation would block or is still in progress.
    #[error("operation in progress")]
    InProgress,

    /// Any other failure reported by the operating system, holding the raw OS error code.
    #[error("system error: {}", describe_os_error(*.0))]
    System(i32),
}

/// Convenience alias for results returned by the engine.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Classifies a raw (positive) OS error code.
    pub fn from_raw_os_error(raw: i32) -> Self {
        match raw {
            sys::errno::INVALID_ARGUMENT => Self::InvalidArgument,
            sys::errno::TIMED_OUT => Self::TimedOut,
            sys::errno::BROKEN_PIPE => Self::StreamClosed,
            sys::errno::OUT_OF_MEMORY => Self::OutOfMemory,
            sys::errno::IN_PROGRESS => Self::InProgress,
            other => Self::System(other),
        }
    }

    /// Returns the error as a member of the unified signed integer space. The result is
    /// always negative.
    pub const fn code(&self) -> i32 {
        let raw = match self {
            Self::InvalidArgument => sys::errno::INVALID_ARGUMENT,
            Self::TimedOut => sys::errno::TIMED_OUT,
            Self::StreamClosed => sys::errno::BROKEN_PIPE,
            Self::OutOfMemory => sys::errno::OUT_OF_MEMORY,
            Self::InProgress => sys::errno::IN_PROGRESS,
            Self::System(raw) => *raw,
        };

        -raw.saturating_abs()
    }

    /// Reconstructs an error from a value previously produced by [`Error::code`]. Returns
    /// `None` for zero or positive values, which denote success.
    pub fn from_code(code: i32) -> Option<Self> {
        if code >= 0 {
            None
        } else {
            Some(Self::from_raw_os_error(code.saturating_neg()))
        }
    }

    /// Returns the raw OS error code, if this error carries one that is not covered by a
    /// named variant.
    pub const fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::System(raw) => Some(*raw),
            _ => None,
        }
    }
}

fn describe_os_error(raw: i32) -> std::io::Error {
    std::io::Error::from_raw_os_error(raw)
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        if let Some(raw) = error.raw_os_error() {
            return Self::from_raw_os_error(raw);
        }

        match error.kind() {
            std::io::ErrorKind::InvalidInput => Self::InvalidArgument,
            std::io::ErrorKind::TimedOut => Self::TimedOut,
            std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::UnexpectedEof => {
                Self::StreamClosed
            }
            std::io::ErrorKind::OutOfMemory => Self::OutOfMemory,
            std::io::ErrorKind::WouldBlock => Self::InProgress,
            _ => Self::System(sys::errno::UNKNOWN),
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::TimedOut => Self::new(std::io::ErrorKind::TimedOut, error),
            Error::StreamClosed => Self::new(std::io::ErrorKind::BrokenPipe, error),
            Error::InvalidArgument => Self::new(std::io::ErrorKind::InvalidInput, error),
            Error::OutOfMemory | Error::InProgress => Self::from_raw_os_error(-error.code()),
            Error::System(raw) => Self::from_raw_os_error(raw),
        }
    }
}

#[cfg(unix)]
impl From<nix::errno::Errno> for Error {
    fn from(errno: nix::errno::Errno) -> Self {
        Self::from_raw_os_error(errno as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn named_errors_have_negative_codes() {
        for error in [
            Error::InvalidArgument,
            Error::TimedOut,
            Error::StreamClosed,
            Error::OutOfMemory,
            Error::InProgress,
        ] {
            assert!(error.code() < 0, "{error:?} should be negative");
            assert_eq!(Error::from_code(error.code()), Some(error));
        }
    }

    #[test]
    fn success_values_are_not_errors() {
        assert_eq!(Error::from_code(0), None);
        assert_eq!(Error::from_code(42), None);
    }

    #[test]
    fn unknown_os_errors_are_wrapped() {
        let error = Error::from_raw_os_error(sys::errno::UNKNOWN);
        assert_eq!(error, Error::System(sys::errno::UNKNOWN));
        assert_eq!(error.raw_os_error(), Some(sys::errno::UNKNOWN));
        assert_eq!(error.code(), -sys::errno::UNKNOWN);
    }

    #[test]
    fn io_errors_are_classified() {
        let broken = std::io::Error::from_raw_os_error(sys::errno::BROKEN_PIPE);
        assert_eq!(Error::from(broken), Error::StreamClosed);

        let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert_eq!(Error::from(timed_out), Error::TimedOut);
    }

    #[test]
    fn converts_back_into_io_errors() {
        let io: std::io::Error = Error::StreamClosed.into();
        assert_eq!(io.kind(), std::io::ErrorKind::BrokenPipe);
    }
}
