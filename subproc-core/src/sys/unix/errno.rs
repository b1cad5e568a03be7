//! Raw error codes the engine gives names to.

use nix::libc;

pub(crate) const INVALID_ARGUMENT: i32 = libc::EINVAL;
pub(crate) const NOT_FOUND: i32 = libc::ENOENT;
pub(crate) const TIMED_OUT: i32 = libc::ETIMEDOUT;
pub(crate) const BROKEN_PIPE: i32 = libc::EPIPE;
pub(crate) const OUT_OF_MEMORY: i32 = libc::ENOMEM;
pub(crate) const IN_PROGRESS: i32 = libc::EINPROGRESS;

/// Reported when a failure carries no OS code of its own.
pub(crate) const UNKNOWN: i32 = libc::EIO;
