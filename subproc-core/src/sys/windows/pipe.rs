//! Pipe readiness and non-blocking transfer on Windows.
//!
//! Anonymous pipes cannot be waited on, so readiness is established by peeking at the pipe
//! at increasing intervals. The parent's write end is switched to no-wait mode, in which a
//! write to a full pipe completes immediately without transferring anything.

use std::io::{Read, Write};
use std::os::windows::io::AsRawHandle;
use std::time::Duration;

use os_pipe::{PipeReader, PipeWriter};
use windows::Win32::Foundation::HANDLE;
use windows::Win32::System::Pipes::{PIPE_NOWAIT, PeekNamedPipe, SetNamedPipeHandleState};

use crate::error::{Error, Result};
use crate::sys::errno;
use crate::timing::Countdown;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Read ends are only read after peeking reports data, so they stay in blocking mode.
pub(crate) fn prepare_reader(_end: &PipeReader) -> Result<()> {
    Ok(())
}

pub(crate) fn prepare_writer(end: &PipeWriter) -> Result<()> {
    let mode = PIPE_NOWAIT;
    let handle = HANDLE(end.as_raw_handle());

    // SAFETY: the handle is a valid pipe handle owned by `end`; only its mode changes.
    unsafe { SetNamedPipeHandleState(handle, Some(&raw const mode), None, None)? };
    Ok(())
}

/// Growing an anonymous pipe after creation is not supported.
pub(crate) fn reserve(_end: &PipeWriter, _len: usize) -> bool {
    false
}

struct Backoff {
    countdown: Countdown,
    interval: Duration,
}

impl Backoff {
    fn new(timeout: Option<Duration>) -> Self {
        Self {
            countdown: Countdown::new(timeout),
            interval: MIN_POLL_INTERVAL,
        }
    }

    fn pause(&mut self) -> Result<()> {
        if self.countdown.expired() {
            return Err(Error::TimedOut);
        }

        let pause = self
            .countdown
            .remaining()
            .map_or(self.interval, |remaining| remaining.min(self.interval));
        std::thread::sleep(pause);
        self.interval = (self.interval * 2).min(MAX_POLL_INTERVAL);
        Ok(())
    }
}

/// Blocks until one of `ends` has data or has been closed by its peer. Returns the index of
/// the first such end, or [`Error::TimedOut`] if none became ready in time.
pub(crate) fn wait_readable(ends: &[&PipeReader], timeout: Option<Duration>) -> Result<usize> {
    let mut backoff = Backoff::new(timeout);

    loop {
        for (index, end) in ends.iter().enumerate() {
            let mut available = 0u32;

            // SAFETY: the handle is a valid pipe handle; only the byte count is written.
            let peeked = unsafe {
                PeekNamedPipe(
                    HANDLE(end.as_raw_handle()),
                    None,
                    0,
                    None,
                    Some(&raw mut available),
                    None,
                )
            };

            // A failed peek means the pipe is broken; the read reports it.
            if peeked.is_err() || available > 0 {
                return Ok(index);
            }
        }

        backoff.pause()?;
    }
}

/// Reads data known to be available. End of stream is reported as [`Error::StreamClosed`].
pub(crate) fn read_available(end: &PipeReader, buffer: &mut [u8]) -> Result<usize> {
    let mut end = end;
    match end.read(buffer) {
        Ok(0) => Err(Error::StreamClosed),
        Ok(count) => Ok(count),
        Err(e) => Err(e.into()),
    }
}

/// Writes as much of `buffer` as the pipe accepts once it has room. Returns the number of
/// bytes written, which is always non-zero on success.
pub(crate) fn write(end: &PipeWriter, buffer: &[u8], timeout: Option<Duration>) -> Result<usize> {
    let mut backoff = Backoff::new(timeout);
    let mut end = end;

    loop {
        match end.write(buffer) {
            Ok(0) => (),
            Ok(count) => return Ok(count),
            Err(e) if e.raw_os_error() == Some(errno::NO_DATA) => return Err(Error::StreamClosed),
            Err(e) => return Err(e.into()),
        }

        backoff.pause()?;
    }
}
