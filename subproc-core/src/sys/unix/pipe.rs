//! Pipe readiness and non-blocking transfer on POSIX.

use std::io::{Read, Write};
use std::os::fd::AsFd;
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::libc;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::signal::{SigSet, SigmaskHow, Signal};
use os_pipe::{PipeReader, PipeWriter};

use crate::error::{Error, Result};
use crate::timing::Countdown;

/// Puts the parent's end of a pipe into non-blocking mode, so that a transfer after a
/// readiness notification never blocks.
fn set_nonblocking(end: &impl AsFd) -> Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(end.as_fd(), FcntlArg::F_GETFL)?);
    fcntl(end.as_fd(), FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

pub(crate) fn prepare_reader(end: &PipeReader) -> Result<()> {
    set_nonblocking(end)
}

pub(crate) fn prepare_writer(end: &PipeWriter) -> Result<()> {
    set_nonblocking(end)
}

/// Grows the pipe's buffer so that `len` bytes can be written without a reader. Best effort:
/// returns whether the pipe can now hold that many bytes.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn reserve(end: &PipeWriter, len: usize) -> bool {
    let Ok(len) = libc::c_int::try_from(len) else {
        return false;
    };

    match fcntl(end.as_fd(), FcntlArg::F_GETPIPE_SZ) {
        Ok(capacity) if capacity >= len => true,
        _ => fcntl(end.as_fd(), FcntlArg::F_SETPIPE_SZ(len)).is_ok_and(|size| size >= len),
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn reserve(_end: &PipeWriter, _len: usize) -> bool {
    false
}

fn poll_timeout(remaining: Option<Duration>) -> PollTimeout {
    match remaining {
        None => PollTimeout::NONE,
        Some(remaining) => {
            // Round up so that a sub-millisecond remainder still blocks.
            let millis = remaining.as_micros().div_ceil(1000);
            i32::try_from(millis)
                .ok()
                .and_then(|millis| PollTimeout::try_from(millis).ok())
                .unwrap_or(PollTimeout::MAX)
        }
    }
}

/// Blocks until one of `ends` is readable or has been closed by its peer. Returns the index
/// of the first such end, or [`Error::TimedOut`] if none became ready in time.
pub(crate) fn wait_readable(ends: &[&PipeReader], timeout: Option<Duration>) -> Result<usize> {
    let countdown = Countdown::new(timeout);
    let mut poll_fds: Vec<_> = ends
        .iter()
        .map(|end| PollFd::new(end.as_fd(), PollFlags::POLLIN))
        .collect();

    loop {
        match poll(&mut poll_fds, poll_timeout(countdown.remaining())) {
            Ok(0) => return Err(Error::TimedOut),
            Ok(_) => {
                let ready = poll_fds.iter().position(|poll_fd| {
                    poll_fd.revents().is_some_and(|revents| {
                        revents.intersects(
                            PollFlags::POLLIN
                                | PollFlags::POLLHUP
                                | PollFlags::POLLERR
                                | PollFlags::POLLNVAL,
                        )
                    })
                });

                if let Some(index) = ready {
                    return Ok(index);
                }
            }
            // Retry on signal with recalculated timeout.
            Err(Errno::EINTR) => (),
            Err(e) => return Err(e.into()),
        }

        if countdown.expired() {
            return Err(Error::TimedOut);
        }
    }
}

/// Blocks until `end` can accept at least one byte, or its peer has gone away.
fn wait_writable(end: &PipeWriter, countdown: &Countdown) -> Result<()> {
    let mut poll_fds = [PollFd::new(end.as_fd(), PollFlags::POLLOUT)];

    loop {
        match poll(&mut poll_fds, poll_timeout(countdown.remaining())) {
            Ok(0) => return Err(Error::TimedOut),
            Ok(_) => return Ok(()),
            Err(Errno::EINTR) => (),
            Err(e) => return Err(e.into()),
        }

        if countdown.expired() {
            return Err(Error::TimedOut);
        }
    }
}

/// Reads whatever is available from a non-blocking pipe end. End of stream is reported as
/// [`Error::StreamClosed`] and an empty pipe as [`Error::InProgress`].
pub(crate) fn read_available(end: &PipeReader, buffer: &mut [u8]) -> Result<usize> {
    let mut end = end;
    loop {
        match end.read(buffer) {
            Ok(0) => return Err(Error::StreamClosed),
            Ok(count) => return Ok(count),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => (),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                return Err(Error::InProgress);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Writes as much of `buffer` as the pipe accepts once it becomes writable. Returns the
/// number of bytes written, which is always non-zero on success.
pub(crate) fn write(end: &PipeWriter, buffer: &[u8], timeout: Option<Duration>) -> Result<usize> {
    let countdown = Countdown::new(timeout);

    loop {
        wait_writable(end, &countdown)?;

        match write_without_sigpipe(end, buffer) {
            Ok(count) => return Ok(count),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => (),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if countdown.expired() {
                    return Err(Error::TimedOut);
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Writes to a pipe without letting a closed reader raise `SIGPIPE` against the whole
/// process. The signal is blocked for the duration of the write and, if the write itself
/// generated one, consumed before the original mask is restored.
fn write_without_sigpipe(end: &PipeWriter, buffer: &[u8]) -> std::io::Result<usize> {
    let mut sigpipe = SigSet::empty();
    sigpipe.add(Signal::SIGPIPE);

    let already_pending = sigpipe_pending();
    let previous = sigpipe.thread_swap_mask(SigmaskHow::SIG_BLOCK)?;

    let mut end = end;
    let result = end.write(buffer);

    let broken = matches!(&result, Err(e) if e.raw_os_error() == Some(libc::EPIPE));
    if broken && !already_pending && !previous.contains(Signal::SIGPIPE) && sigpipe_pending() {
        // Pending and blocked, so this returns immediately.
        let _ = sigpipe.wait();
    }

    previous.thread_set_mask()?;
    result
}

fn sigpipe_pending() -> bool {
    let mut pending = std::mem::MaybeUninit::<libc::sigset_t>::uninit();

    // SAFETY: sigpending only writes into the provided set.
    let result = unsafe { libc::sigpending(pending.as_mut_ptr()) };
    if result != 0 {
        return false;
    }

    // SAFETY: sigpending succeeded, so the set is initialized.
    let pending = unsafe { pending.assume_init() };

    // SAFETY: the set is initialized and SIGPIPE is a valid signal number.
    unsafe { libc::sigismember(&raw const pending, libc::SIGPIPE) == 1 }
}
