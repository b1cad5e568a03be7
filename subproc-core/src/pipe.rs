//! Unidirectional byte channels between parent and child.
//!
//! Every blocking primitive here takes an optional timeout: `None` blocks until the pipe is
//! ready, and a zero duration only polls.

use std::time::Duration;

pub(crate) use os_pipe::{PipeReader, PipeWriter};

use crate::error::{Error, Result};
use crate::sys;
use crate::timing::Countdown;

/// Creates a pipe. Both ends are closed automatically when dropped, and neither is inherited
/// by children unless explicitly attached to one.
pub(crate) fn create() -> Result<(PipeReader, PipeWriter)> {
    Ok(os_pipe::pipe()?)
}

/// Reads up to `buffer.len()` bytes, waiting up to `timeout` for data to arrive.
///
/// Returns [`Error::StreamClosed`] once the writer has gone away and no data remains.
pub(crate) fn read(
    end: &PipeReader,
    buffer: &mut [u8],
    timeout: Option<Duration>,
) -> Result<usize> {
    if buffer.is_empty() {
        return Err(Error::InvalidArgument);
    }

    let countdown = Countdown::new(timeout);
    loop {
        sys::pipe::wait_readable(&[end], countdown.remaining())?;

        match sys::pipe::read_available(end, buffer) {
            Err(Error::InProgress) if countdown.expired() => return Err(Error::TimedOut),
            Err(Error::InProgress) => (),
            result => return result,
        }
    }
}

/// Reads from an end that [`wait_ready`] reported as ready. May fail with
/// [`Error::InProgress`] if the readiness notification was spurious.
pub(crate) fn read_available(end: &PipeReader, buffer: &mut [u8]) -> Result<usize> {
    if buffer.is_empty() {
        return Err(Error::InvalidArgument);
    }

    sys::pipe::read_available(end, buffer)
}

/// Writes up to `buffer.len()` bytes, waiting up to `timeout` for the reader to make room.
///
/// Returns [`Error::StreamClosed`] if the reader has gone away.
pub(crate) fn write(end: &PipeWriter, buffer: &[u8], timeout: Option<Duration>) -> Result<usize> {
    if buffer.is_empty() {
        return Ok(0);
    }

    let count = sys::pipe::write(end, buffer, timeout)?;
    tracing::trace!(target: crate::trace_categories::PIPE, "wrote {count} bytes");
    Ok(count)
}

/// Writes the whole of `buffer`, bounding the entire transfer by `timeout`.
pub(crate) fn write_all(
    end: &PipeWriter,
    mut buffer: &[u8],
    timeout: Option<Duration>,
) -> Result<()> {
    let countdown = Countdown::new(timeout);
    while !buffer.is_empty() {
        let count = write(end, buffer, countdown.remaining())?;
        buffer = &buffer[count..];
    }
    Ok(())
}

/// Waits until one of `ends` is readable or closed and returns its index.
pub(crate) fn wait_ready(ends: &[&PipeReader], timeout: Option<Duration>) -> Result<usize> {
    if ends.is_empty() {
        return Err(Error::StreamClosed);
    }

    sys::pipe::wait_readable(ends, timeout)
}

#[allow(clippy::panic_in_result_fn)]
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parent_pipe() -> anyhow::Result<(PipeReader, PipeWriter)> {
        let (reader, writer) = create()?;
        sys::pipe::prepare_reader(&reader)?;
        sys::pipe::prepare_writer(&writer)?;
        Ok((reader, writer))
    }

    #[test]
    fn read_returns_written_bytes() -> anyhow::Result<()> {
        let (reader, writer) = parent_pipe()?;
        write_all(&writer, b"hello", None)?;

        let mut buffer = [0; 16];
        let count = read(&reader, &mut buffer, Some(Duration::from_secs(5)))?;
        assert_eq!(&buffer[..count], b"hello");
        Ok(())
    }

    #[test]
    fn zero_timeout_only_polls() -> anyhow::Result<()> {
        let (reader, _writer) = parent_pipe()?;
        assert_eq!(read(&reader, &mut [0; 4], Some(Duration::ZERO)), Err(Error::TimedOut));
        Ok(())
    }

    #[test]
    fn closed_writer_ends_stream() -> anyhow::Result<()> {
        let (reader, writer) = parent_pipe()?;
        write_all(&writer, b"x", None)?;
        drop(writer);

        let mut buffer = [0; 4];
        assert_eq!(read(&reader, &mut buffer, None)?, 1);
        assert_eq!(read(&reader, &mut buffer, None), Err(Error::StreamClosed));
        Ok(())
    }

    #[test]
    fn closed_reader_rejects_writes() -> anyhow::Result<()> {
        let (reader, writer) = parent_pipe()?;
        drop(reader);
        assert_eq!(write(&writer, b"x", Some(Duration::from_secs(1))), Err(Error::StreamClosed));
        Ok(())
    }

    #[test]
    fn wait_ready_picks_the_readable_end() -> anyhow::Result<()> {
        let (first, _first_writer) = parent_pipe()?;
        let (second, second_writer) = parent_pipe()?;

        assert_eq!(
            wait_ready(&[&first, &second], Some(Duration::from_millis(10))),
            Err(Error::TimedOut)
        );

        write_all(&second_writer, b"ready", None)?;
        assert_eq!(wait_ready(&[&first, &second], Some(Duration::from_secs(5)))?, 1);
        Ok(())
    }

    #[test]
    fn nothing_to_wait_on() {
        assert_eq!(wait_ready(&[], None), Err(Error::StreamClosed));
    }

    #[test]
    fn empty_buffers() -> anyhow::Result<()> {
        let (reader, writer) = parent_pipe()?;
        assert_eq!(write(&writer, b"", None)?, 0);
        assert_eq!(read(&reader, &mut [], None), Err(Error::InvalidArgument));
        Ok(())
    }
}
