//! The process lifecycle state machine.

use std::ffi::OsStr;
use std::io::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::bootstrap::{ChildStdio, Launch};
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::options::{Options, Resolved};
use crate::pipe::{self, PipeReader, PipeWriter};
use crate::redirect::{self, Stream};
use crate::status::ExitStatus;
use crate::stop::StopActions;
use crate::sys;
use crate::timing::{self, Countdown, Timeout};
use crate::trace_categories;

/// Size of the buffer [`Process::drain`] reads into.
const DRAIN_BUFFER_SIZE: usize = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    NotStarted,
    Running,
    Exited(ExitStatus),
    /// This record lives in the child branch of [`Process::fork`].
    ForkedChild,
}

#[derive(Debug)]
struct Lifecycle {
    state: State,
    child: Handle<sys::process::Child>,
}

#[derive(Debug, Default)]
struct Outputs {
    stdout: Handle<PipeReader>,
    stderr: Handle<PipeReader>,
}

impl Outputs {
    fn get_mut(&mut self, stream: Stream) -> Option<&mut Handle<PipeReader>> {
        match stream {
            Stream::Out => Some(&mut self.stdout),
            Stream::Err => Some(&mut self.stderr),
            Stream::In => None,
        }
    }
}

/// Which side of [`Process::fork`] the caller is running on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForkRole {
    /// The original process. The record now tracks the forked child.
    Parent,
    /// The forked child. The record may only be dropped.
    Child,
}

/// A child process and the parent's ends of its standard streams.
///
/// A record starts out empty. [`Process::start`] creates the child; from then on the I/O
/// primitives, [`Process::wait`] and the termination requests may be used, including from
/// several threads at once: reads, writes and waits each serialize only among themselves.
/// The child's exit is only recorded by a wait (or by [`Process::is_running`]); once
/// recorded, the status is cached and every later wait returns it without asking the OS.
///
/// Dropping a record whose child has not been observed to exit closes the child's standard
/// input and runs the stop sequence configured in [`Options::stop`]. Every OS resource is
/// released afterwards, whether or not the child could be stopped.
#[derive(Debug)]
pub struct Process {
    lifecycle: Mutex<Lifecycle>,
    stdin: Mutex<Handle<PipeWriter>>,
    outputs: Mutex<Outputs>,
    stop: StopActions,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn get_mut<T>(mutex: &mut Mutex<T>) -> &mut T {
    mutex.get_mut().unwrap_or_else(PoisonError::into_inner)
}

/// Everything produced for the three standard streams before the child exists.
struct Streams {
    stdin: Option<PipeWriter>,
    stdout: Option<PipeReader>,
    stderr: Option<PipeReader>,
    child: ChildStdio,
}

impl Streams {
    /// Produces every redirect. Whatever was created is released again if a later stream
    /// fails.
    fn open(options: &Resolved) -> Result<Self> {
        let stdin = redirect::input(&options.stdin)?;
        let stdout = redirect::output(Stream::Out, &options.stdout, None)?;
        let stderr = redirect::output(Stream::Err, &options.stderr, Some(&stdout.child))?;

        Ok(Self {
            stdin: stdin.parent,
            stdout: stdout.parent,
            stderr: stderr.parent,
            child: ChildStdio {
                stdin: stdin.child,
                stdout: stdout.child,
                stderr: stderr.child,
            },
        })
    }
}

impl Default for Process {
    fn default() -> Self {
        Self::new()
    }
}

impl Process {
    /// Creates an empty record. Nothing is allocated from the OS until the record is started.
    pub fn new() -> Self {
        Self {
            lifecycle: Mutex::new(Lifecycle {
                state: State::NotStarted,
                child: Handle::invalid(),
            }),
            stdin: Mutex::new(Handle::invalid()),
            outputs: Mutex::new(Outputs::default()),
            stop: StopActions::default(),
            timeout: None,
            deadline: None,
        }
    }

    /// Starts `command` (program first, then its arguments) as a child process.
    ///
    /// The options are validated before any resource is created. If creating the child fails,
    /// every resource created so far is released and the record remains unstarted. A program
    /// that cannot be executed is reported here, with the OS error the child hit, rather than
    /// as a child exit status.
    ///
    /// If [`Options::input`] does not fit in the pipe ahead of time, the remainder is written
    /// once the child is running. Should that fail for any reason other than the child closing
    /// its standard input, the child is killed and reaped, the error is returned, and the
    /// record is left unstarted.
    pub fn start<S: AsRef<OsStr>>(&mut self, command: &[S], options: Options) -> Result<()> {
        self.ensure_unstarted()?;

        let options = options.resolve()?;
        let launch = Launch::new(command, &options.environment, options.working_dir.as_deref())?;

        tracing::debug!(
            target: trace_categories::PROCESS,
            "starting {}",
            launch.program.display()
        );

        self.launch(&options, |stdio| sys::process::spawn(&launch, stdio).map(Some))
            .map(|_| ())
    }

    /// Forks the calling process instead of starting a new program. The child's standard
    /// streams are set up from `options` exactly as for [`Process::start`].
    ///
    /// In the parent, the record tracks the child and [`ForkRole::Parent`] is returned. In the
    /// child, [`ForkRole::Child`] is returned and the record may only be dropped. The forked
    /// child is subject to the usual restrictions on code running after `fork` in a
    /// multi-threaded program.
    #[cfg(unix)]
    pub fn fork(&mut self, options: Options) -> Result<ForkRole> {
        self.ensure_unstarted()?;

        let options = options.resolve()?;
        self.launch(&options, sys::process::fork)
    }

    fn ensure_unstarted(&mut self) -> Result<()> {
        match get_mut(&mut self.lifecycle).state {
            State::NotStarted => Ok(()),
            _ => Err(Error::InvalidArgument),
        }
    }

    fn launch(
        &mut self,
        options: &Resolved,
        create: impl FnOnce(ChildStdio) -> Result<Option<sys::process::Child>>,
    ) -> Result<ForkRole> {
        let Streams {
            stdin,
            stdout,
            stderr,
            child: stdio,
        } = Streams::open(options)?;

        let mut pending_input: &[u8] = &[];
        if let (Some(input), Some(writer)) = (options.input.as_deref(), &stdin) {
            sys::pipe::reserve(writer, input.len());
            pending_input = prefill(writer, input)?;
        }

        let Some(child) = create(stdio)? else {
            get_mut(&mut self.lifecycle).state = State::ForkedChild;
            return Ok(ForkRole::Child);
        };

        tracing::debug!(target: trace_categories::PROCESS, "started child {}", child.id());

        *get_mut(&mut self.lifecycle) = Lifecycle {
            state: State::Running,
            child: Handle::new(child),
        };
        *get_mut(&mut self.outputs) = Outputs {
            stdout: stdout.into(),
            stderr: stderr.into(),
        };
        self.stop = options.stop;
        self.timeout = options.timeout;
        self.deadline = options
            .deadline
            .and_then(|deadline| Instant::now().checked_add(deadline));

        if options.input.is_none() {
            *get_mut(&mut self.stdin) = stdin.into();
        } else if let Some(writer) = stdin {
            // The child's standard input ends once the input has been delivered.
            match pipe::write_all(&writer, pending_input, self.timeout) {
                Ok(()) | Err(Error::StreamClosed) => (),
                Err(e) => {
                    drop(writer);
                    self.abandon_start();
                    return Err(e);
                }
            }
        }

        Ok(ForkRole::Parent)
    }

    /// Kills and reaps a child whose start could not be completed, then returns the record
    /// to its unstarted state.
    fn abandon_start(&mut self) {
        if let Err(e) = self.kill().and_then(|()| self.wait(Timeout::Infinite)) {
            tracing::warn!(target: trace_categories::PROCESS, "failed to reap child: {e}");
        }
        *self = Self::new();
    }

    /// The OS identifier of the child, once started.
    pub fn pid(&self) -> Option<u32> {
        lock(&self.lifecycle).child.get().map(sys::process::Child::id)
    }

    /// The child's exit status, if its exit has been observed.
    pub fn status(&self) -> Option<ExitStatus> {
        match lock(&self.lifecycle).state {
            State::Exited(status) => Some(status),
            _ => None,
        }
    }

    /// Checks, without blocking, whether the child is still running. Records the exit status
    /// if the child has exited.
    pub fn is_running(&self) -> bool {
        matches!(self.reap(), Ok(None))
    }

    fn ensure_started(&self) -> Result<()> {
        match lock(&self.lifecycle).state {
            State::Running | State::Exited(_) => Ok(()),
            State::NotStarted | State::ForkedChild => Err(Error::InvalidArgument),
        }
    }

    /// Reads from whichever of the child's standard output and standard error has data first,
    /// returning the stream that was read and the number of bytes placed in `buffer`.
    ///
    /// Blocks for at most the configured timeout, and never past the deadline. A stream
    /// whose writer has gone away is closed and skipped from then on; once both are closed,
    /// [`Error::StreamClosed`] is returned. Data the child wrote before exiting can still be
    /// read after it has exited.
    pub fn read(&self, buffer: &mut [u8]) -> Result<(Stream, usize)> {
        self.ensure_started()?;
        let mut outputs = lock(&self.outputs);

        loop {
            let timeout = timing::expiry(self.timeout, self.deadline)?;

            let (stream, result) = {
                let mut open = Vec::with_capacity(2);
                if let Some(end) = outputs.stdout.get() {
                    open.push((Stream::Out, end));
                }
                if let Some(end) = outputs.stderr.get() {
                    open.push((Stream::Err, end));
                }

                match open.as_slice() {
                    [] => return Err(Error::StreamClosed),
                    [(stream, end)] => (*stream, pipe::read(end, buffer, timeout)),
                    _ => {
                        let ends: Vec<&PipeReader> = open.iter().map(|(_, end)| *end).collect();
                        let index = pipe::wait_ready(&ends, timeout)?;
                        (open[index].0, pipe::read_available(ends[index], buffer))
                    }
                }
            };

            match result {
                Ok(count) => return Ok((stream, count)),
                Err(Error::StreamClosed) => {
                    tracing::trace!(
                        target: trace_categories::PIPE,
                        "{stream:?} reached end of stream"
                    );
                    if let Some(end) = outputs.get_mut(stream) {
                        end.release();
                    }
                }
                // Spurious readiness; wait again.
                Err(Error::InProgress) => (),
                Err(e) => return Err(e),
            }
        }
    }

    /// Writes up to `buffer.len()` bytes to the child's standard input, blocking for at most
    /// the configured timeout (and never past the deadline) for room in the pipe. Returns the
    /// number of bytes written.
    ///
    /// If the child has closed its standard input, the parent's end is closed as well and
    /// [`Error::StreamClosed`] is returned.
    pub fn write(&self, buffer: &[u8]) -> Result<usize> {
        self.ensure_started()?;
        if buffer.is_empty() {
            return Ok(0);
        }

        let mut stdin = lock(&self.stdin);
        let Some(end) = stdin.get() else {
            return Err(Error::StreamClosed);
        };

        let timeout = timing::expiry(self.timeout, self.deadline)?;
        match pipe::write(end, buffer, timeout) {
            Err(Error::StreamClosed) => {
                tracing::trace!(target: trace_categories::PIPE, "child closed its standard input");
                stdin.release();
                Err(Error::StreamClosed)
            }
            result => result,
        }
    }

    /// Writes the whole of `buffer` to the child's standard input. Each underlying write is
    /// bounded as described for [`Process::write`].
    pub fn write_all(&self, mut buffer: &[u8]) -> Result<()> {
        while !buffer.is_empty() {
            let count = self.write(buffer)?;
            buffer = &buffer[count..];
        }
        Ok(())
    }

    /// Closes the parent's end of one of the child's standard streams. Closing standard input
    /// signals end of input to the child. Closing an already closed stream succeeds.
    pub fn close(&self, stream: Stream) -> Result<()> {
        if lock(&self.lifecycle).state == State::ForkedChild {
            return Err(Error::InvalidArgument);
        }

        match stream {
            Stream::In => lock(&self.stdin).release(),
            Stream::Out => lock(&self.outputs).stdout.release(),
            Stream::Err => lock(&self.outputs).stderr.release(),
        }
        Ok(())
    }

    /// Waits for the child to exit and returns its exit status.
    ///
    /// Returns the cached status immediately if the exit was already observed. Otherwise
    /// blocks for at most `timeout` (see [`Timeout`]), failing with [`Error::TimedOut`] if the
    /// child is still running by then.
    ///
    /// On POSIX the exit is detected by polling with a backoff of up to 10 ms, so this may
    /// return up to about 10 ms after the child actually exits.
    pub fn wait(&self, timeout: Timeout) -> Result<ExitStatus> {
        let mut sleeper = {
            let lifecycle = lock(&self.lifecycle);
            match (lifecycle.state, lifecycle.child.get()) {
                (State::Exited(status), _) => return Ok(status),
                (State::Running, Some(child)) => child.sleeper(),
                _ => return Err(Error::InvalidArgument),
            }
        };

        let countdown = Countdown::new(timeout.resolve(self.deadline));
        loop {
            if let Some(status) = self.reap()? {
                return Ok(status);
            }
            if countdown.expired() {
                return Err(Error::TimedOut);
            }
            sleeper.sleep(countdown.remaining())?;
        }
    }

    /// Collects the exit status if the child has exited, without blocking.
    fn reap(&self) -> Result<Option<ExitStatus>> {
        let mut lifecycle = lock(&self.lifecycle);

        let status = match (lifecycle.state, lifecycle.child.get()) {
            (State::Exited(status), _) => return Ok(Some(status)),
            (State::Running, Some(child)) => match child.try_reap()? {
                Some(status) => status,
                None => return Ok(None),
            },
            _ => return Err(Error::InvalidArgument),
        };

        tracing::debug!(target: trace_categories::PROCESS, "child exited: {status}");
        lifecycle.state = State::Exited(status);
        Ok(Some(status))
    }

    /// Asks the child to exit. Succeeds without doing anything if the child has already
    /// exited. Only [`Process::wait`] observes the exit itself.
    pub fn terminate(&self) -> Result<()> {
        self.signal(sys::process::Child::terminate)
    }

    /// Forcibly stops the child. Succeeds without doing anything if the child has already
    /// exited. Only [`Process::wait`] observes the exit itself.
    pub fn kill(&self) -> Result<()> {
        self.signal(sys::process::Child::kill)
    }

    fn signal(&self, send: impl FnOnce(&sys::process::Child) -> Result<()>) -> Result<()> {
        // Held while signalling, so the child cannot be reaped (and its identifier reused)
        // in between.
        let lifecycle = lock(&self.lifecycle);

        match (lifecycle.state, lifecycle.child.get()) {
            (State::Exited(_), _) => Ok(()),
            (State::Running, Some(child)) => send(child),
            _ => Err(Error::InvalidArgument),
        }
    }

    /// Reads the child's standard output and standard error until both are closed, copying
    /// each into the corresponding writer as it arrives.
    pub fn drain(&self, out: &mut impl Write, err: &mut impl Write) -> Result<()> {
        let mut buffer = [0u8; DRAIN_BUFFER_SIZE];

        loop {
            let (stream, count) = match self.read(&mut buffer) {
                Ok(read) => read,
                Err(Error::StreamClosed) => return Ok(()),
                Err(e) => return Err(e),
            };

            match stream {
                Stream::Err => err.write_all(&buffer[..count])?,
                _ => out.write_all(&buffer[..count])?,
            }
        }
    }

    /// Stops the child if it is still running, using the stop sequence from the options,
    /// and releases every resource. Equivalent to dropping the record.
    pub fn destroy(self) {
        drop(self);
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        if get_mut(&mut self.lifecycle).state == State::Running {
            get_mut(&mut self.stdin).release();

            if let Err(e) = self.stop(self.stop) {
                tracing::warn!(target: trace_categories::PROCESS, "failed to stop child: {e}");
            }
        }

        get_mut(&mut self.stdin).release();
        let outputs = get_mut(&mut self.outputs);
        outputs.stdout.release();
        outputs.stderr.release();
        get_mut(&mut self.lifecycle).child.release();
    }
}

/// Writes as much of `input` as the pipe accepts without blocking, returning the rest.
fn prefill<'a>(writer: &PipeWriter, mut input: &'a [u8]) -> Result<&'a [u8]> {
    while !input.is_empty() {
        match pipe::write(writer, input, Some(Duration::ZERO)) {
            Ok(count) => input = &input[count..],
            Err(Error::TimedOut) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(input)
}

#[allow(clippy::panic_in_result_fn)]
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn unstarted_record_rejects_operations() {
        let process = Process::new();
        assert_eq!(process.pid(), None);
        assert_eq!(process.status(), None);
        assert!(!process.is_running());
        assert_eq!(process.wait(Timeout::Infinite), Err(Error::InvalidArgument));
        assert_eq!(process.terminate(), Err(Error::InvalidArgument));
        assert_eq!(process.kill(), Err(Error::InvalidArgument));
        assert_eq!(process.read(&mut [0; 8]).map(|_| ()), Err(Error::InvalidArgument));
        assert_eq!(process.write(b"x"), Err(Error::InvalidArgument));
        assert_eq!(process.close(Stream::In), Ok(()));
    }

    #[test]
    fn invalid_options_leave_record_unstarted() {
        let mut process = Process::new();
        let options = Options::builder().inherit(true).discard(true).build();
        assert_eq!(process.start(&["true"], options), Err(Error::InvalidArgument));
        assert_eq!(process.pid(), None);

        let empty: [&str; 0] = [];
        assert_eq!(process.start(&empty, Options::default()), Err(Error::InvalidArgument));
    }

    #[cfg(unix)]
    #[test]
    fn echoes_through_cat() -> anyhow::Result<()> {
        let mut process = Process::new();
        let options = Options::builder().timeout(Duration::from_secs(10)).build();
        process.start(&["cat"], options)?;

        process.write_all(b"round trip")?;
        process.close(Stream::In)?;

        let mut out = Vec::new();
        let mut err = Vec::new();
        process.drain(&mut out, &mut err)?;
        assert_eq!(out, b"round trip");
        assert!(err.is_empty());

        assert_eq!(process.wait(Timeout::Infinite)?, ExitStatus::from_code(0));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn starting_twice_is_rejected() -> anyhow::Result<()> {
        let mut process = Process::new();
        process.start(&["true"], Options::builder().discard(true).build())?;
        assert_eq!(
            process.start(&["true"], Options::default()),
            Err(Error::InvalidArgument)
        );
        process.wait(Timeout::Infinite)?;
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn input_is_delivered_and_closed() -> anyhow::Result<()> {
        let mut process = Process::new();
        process.start(&["cat"], Options::builder().input(b"prefilled").build())?;

        assert_eq!(process.write(b"late"), Err(Error::StreamClosed));

        let mut out = Vec::new();
        process.drain(&mut out, &mut std::io::sink())?;
        assert_eq!(out, b"prefilled");
        Ok(())
    }
}
