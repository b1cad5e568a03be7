//! Child creation, signalling and reaping on POSIX.
//!
//! Children are created with `fork` followed by `execve`. Everything the child needs is
//! prepared before forking, so the child only issues async-signal-safe system calls. Failures
//! in the child are reported back over a private close-on-exec pipe (the error channel): the
//! parent reads nothing if the new image was loaded, or the failing `errno` otherwise.

use std::convert::Infallible;
use std::ffi::{CString, OsStr};
use std::io::Read;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::time::Duration;

use nix::errno::Errno;
use nix::libc;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid};
use os_pipe::PipeReader;

use crate::bootstrap::{ChildStdio, Launch};
use crate::error::{Error, Result};
use crate::status::ExitStatus;
use crate::sys::errno;
use crate::trace_categories;

/// Shortest and longest pause between two exit checks.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A child process created by this process and not yet reaped.
#[derive(Debug)]
pub(crate) struct Child {
    pid: Pid,
}

impl Child {
    pub fn id(&self) -> u32 {
        self.pid.as_raw().unsigned_abs()
    }

    /// Collects the child's exit status if it has exited, without blocking.
    pub fn try_reap(&self) -> Result<Option<ExitStatus>> {
        loop {
            match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(_, code)) => return Ok(Some(ExitStatus::from_code(code))),
                Ok(WaitStatus::Signaled(_, signal, _)) => {
                    return Ok(Some(ExitStatus::from_signal(signal as i32)));
                }
                Ok(_) => return Ok(None),
                Err(Errno::EINTR) => (),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Asks the child to exit by sending it `SIGTERM`.
    pub fn terminate(&self) -> Result<()> {
        self.signal(Signal::SIGTERM)
    }

    /// Forcibly stops the child by sending it `SIGKILL`.
    pub fn kill(&self) -> Result<()> {
        self.signal(Signal::SIGKILL)
    }

    fn signal(&self, signal: Signal) -> Result<()> {
        match signal::kill(self.pid, signal) {
            // Exited but not yet reaped by us; nothing left to stop.
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub const fn sleeper(&self) -> Sleeper {
        Sleeper {
            interval: MIN_POLL_INTERVAL,
        }
    }
}

/// Paces repeated exit checks for a child.
#[derive(Debug)]
pub(crate) struct Sleeper {
    interval: Duration,
}

impl Sleeper {
    /// Pauses until the child may have exited, for no longer than `limit`. Wakeups are
    /// advisory: the caller re-checks the child afterwards.
    pub fn sleep(&mut self, limit: Option<Duration>) -> Result<()> {
        let pause = limit.map_or(self.interval, |limit| limit.min(self.interval));
        std::thread::sleep(pause);
        self.interval = (self.interval * 2).min(MAX_POLL_INTERVAL);
        Ok(())
    }
}

/// Creates a child running `launch` with the given standard streams.
pub(crate) fn spawn(launch: &Launch, stdio: ChildStdio) -> Result<Child> {
    let image = ExecImage::new(launch)?;
    let stdio = Descriptors::new(stdio)?;
    let (error_reader, error_writer) = os_pipe::pipe()?;
    let error_writer = above_stdio(OwnedFd::from(error_writer))?;
    let max_fd = open_max();

    match fork_with_signals_blocked()? {
        ForkResult::Child => {
            let reason = exec_child(&image, &stdio, error_writer.as_raw_fd(), max_fd);
            report_and_exit(error_writer.as_raw_fd(), reason)
        }
        ForkResult::Parent { child } => {
            drop(error_writer);
            drop(stdio);
            await_bootstrap(child, &error_reader)
        }
    }
}

/// Forks this process, attaching `stdio` as the child's standard streams. Returns the child in
/// the parent and `None` in the child.
pub(crate) fn fork(stdio: ChildStdio) -> Result<Option<Child>> {
    let stdio = Descriptors::new(stdio)?;
    let (error_reader, error_writer) = os_pipe::pipe()?;
    let error_writer = above_stdio(OwnedFd::from(error_writer))?;

    match fork_with_signals_blocked()? {
        ForkResult::Child => {
            drop(error_reader);
            if let Err(reason) = reset_signals().and_then(|()| stdio.attach()) {
                report_and_exit(error_writer.as_raw_fd(), reason);
            }
            Ok(None)
        }
        ForkResult::Parent { child } => {
            drop(error_writer);
            drop(stdio);
            await_bootstrap(child, &error_reader).map(Some)
        }
    }
}

/// Waits for the child to report on its own setup over the error channel.
fn await_bootstrap(pid: Pid, error_reader: &PipeReader) -> Result<Child> {
    let failure = match read_failure(error_reader) {
        Ok(None) => return Ok(Child { pid }),
        Ok(Some(raw)) => Error::from_raw_os_error(raw),
        Err(e) => {
            // The child's progress is unknown; make sure it does not outlive the failure.
            let _ = signal::kill(pid, Signal::SIGKILL);
            e
        }
    };

    tracing::debug!(target: trace_categories::PROCESS, "child {pid} failed to start: {failure}");
    reap_blocking(pid);
    Err(failure)
}

fn read_failure(mut reader: &PipeReader) -> Result<Option<i32>> {
    let mut buffer = [0u8; size_of::<i32>()];
    let mut filled = 0;

    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(count) => filled += count,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => (),
            Err(e) => return Err(e.into()),
        }
    }

    match filled {
        0 => Ok(None),
        4 => Ok(Some(i32::from_ne_bytes(buffer))),
        _ => Err(Error::System(errno::UNKNOWN)),
    }
}

fn reap_blocking(pid: Pid) {
    while let Err(Errno::EINTR) = waitpid(pid, None) {}
}

/// Forks with every signal blocked, so that no handler inherited from this process can run in
/// the child before its dispositions have been reset. The parent's mask is restored
/// afterwards.
fn fork_with_signals_blocked() -> Result<ForkResult> {
    let previous = SigSet::all().thread_swap_mask(SigmaskHow::SIG_SETMASK)?;

    // SAFETY: the child only performs async-signal-safe operations until it either calls
    // execve or _exit, or (for an explicit fork) hands control back to the caller, who has
    // accepted the usual restrictions of a forked child.
    let result = unsafe { nix::unistd::fork() };

    if !matches!(result, Ok(ForkResult::Child)) {
        previous.thread_set_mask()?;
    }

    Ok(result?)
}

fn reset_signals() -> std::result::Result<(), Errno> {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());

    for signal in Signal::iterator() {
        if matches!(signal, Signal::SIGKILL | Signal::SIGSTOP) {
            continue;
        }

        // SAFETY: installing the default disposition does not register any handler code.
        match unsafe { signal::sigaction(signal, &default) } {
            Ok(_) | Err(Errno::EINVAL) => (),
            Err(e) => return Err(e),
        }
    }

    SigSet::empty().thread_set_mask()
}

/// Runs in the forked child. Only returns if the child could not be set up or `execve`
/// failed.
fn exec_child(image: &ExecImage, stdio: &Descriptors, error_fd: RawFd, max_fd: RawFd) -> Errno {
    let result: std::result::Result<Infallible, Errno> = (|| {
        reset_signals()?;

        if let Some(working_dir) = &image.working_dir {
            // SAFETY: working_dir is a valid NUL-terminated string.
            Errno::result(unsafe { libc::chdir(working_dir.as_ptr()) })?;
        }

        stdio.attach()?;
        close_descriptors(error_fd, max_fd);

        // SAFETY: program is NUL-terminated, and argv and envp are NULL-terminated arrays of
        // pointers into strings owned by `image`, which outlives this call.
        unsafe {
            libc::execve(image.program.as_ptr(), image.argv.as_ptr(), image.envp.as_ptr());
        }
        Err(Errno::last())
    })();

    match result {
        Err(reason) => reason,
        Ok(never) => match never {},
    }
}

fn report_and_exit(error_fd: RawFd, reason: Errno) -> ! {
    let bytes = (reason as i32).to_ne_bytes();

    // SAFETY: bytes is a live buffer of the given length; a failed write leaves nothing more
    // to be done.
    unsafe {
        libc::write(error_fd, bytes.as_ptr().cast(), bytes.len());
    }

    // SAFETY: terminates the forked child without running any of the parent's cleanup.
    unsafe { libc::_exit(127) }
}

/// Closes every descriptor from 3 upwards except `keep`.
fn close_descriptors(keep: RawFd, max_fd: RawFd) {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    if close_range_except(keep) {
        return;
    }

    for fd in 3..max_fd {
        if fd != keep {
            // SAFETY: closing a descriptor we may not own is harmless in a child about to exec.
            unsafe {
                libc::close(fd);
            }
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn close_range_except(keep: RawFd) -> bool {
    let close_range = |first: libc::c_uint, last: libc::c_uint| {
        // SAFETY: close_range only closes descriptors; it has no memory effects.
        unsafe { libc::syscall(libc::SYS_close_range, first, last, 0 as libc::c_uint) == 0 }
    };

    let keep = keep.unsigned_abs();
    (keep <= 3 || close_range(3, keep - 1)) && close_range(keep + 1, libc::c_uint::MAX)
}

fn open_max() -> RawFd {
    // SAFETY: sysconf has no preconditions.
    let limit = unsafe { libc::sysconf(libc::_SC_OPEN_MAX) };
    if limit <= 0 {
        1024
    } else {
        RawFd::try_from(limit).unwrap_or(RawFd::MAX)
    }
}

/// Moves `fd` out of the standard stream range, so that attaching one stream in the child
/// can never overwrite the source of another.
fn above_stdio(fd: OwnedFd) -> Result<OwnedFd> {
    if fd.as_raw_fd() > libc::STDERR_FILENO {
        Ok(fd)
    } else {
        Ok(fd.try_clone()?)
    }
}

/// The child's standard streams, each held outside the 0..=2 range.
#[derive(Debug)]
struct Descriptors([OwnedFd; 3]);

impl Descriptors {
    fn new(stdio: ChildStdio) -> Result<Self> {
        Ok(Self([
            above_stdio(stdio.stdin)?,
            above_stdio(stdio.stdout)?,
            above_stdio(stdio.stderr)?,
        ]))
    }

    /// Installs the descriptors in the standard stream slots of the calling process.
    fn attach(&self) -> std::result::Result<(), Errno> {
        for (target, source) in (0..).zip(&self.0) {
            loop {
                // SAFETY: both descriptors are valid; dup2 clears close-on-exec on the target.
                match Errno::result(unsafe { libc::dup2(source.as_raw_fd(), target) }) {
                    Ok(_) => break,
                    Err(Errno::EINTR) => (),
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }
}

/// Program, arguments and environment in the form `execve` takes them.
struct ExecImage {
    program: CString,
    argv: Vec<*const libc::c_char>,
    envp: Vec<*const libc::c_char>,
    working_dir: Option<CString>,
    // Backing storage for argv and envp.
    _strings: Vec<CString>,
}

impl ExecImage {
    fn new(launch: &Launch) -> Result<Self> {
        let args = launch
            .args
            .iter()
            .map(|arg| c_string(arg))
            .collect::<Result<Vec<_>>>()?;

        let env = launch
            .env
            .iter()
            .map(|(key, value)| {
                let mut entry = key.as_bytes().to_vec();
                entry.push(b'=');
                entry.extend_from_slice(value.as_bytes());
                CString::new(entry).map_err(|_| Error::InvalidArgument)
            })
            .collect::<Result<Vec<_>>>()?;

        let argv = null_terminated(&args);
        let envp = null_terminated(&env);

        let mut strings = args;
        strings.extend(env);

        Ok(Self {
            program: c_string(launch.program.as_os_str())?,
            argv,
            envp,
            working_dir: launch
                .working_dir
                .as_deref()
                .map(|dir| c_string(dir.as_os_str()))
                .transpose()?,
            _strings: strings,
        })
    }
}

fn null_terminated(strings: &[CString]) -> Vec<*const libc::c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

fn c_string(value: &OsStr) -> Result<CString> {
    CString::new(value.as_bytes()).map_err(|_| Error::InvalidArgument)
}

#[allow(clippy::panic_in_result_fn)]
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::ffi::OsString;
    use std::path::PathBuf;

    fn null_stdio() -> anyhow::Result<ChildStdio> {
        let open = || std::fs::OpenOptions::new().read(true).write(true).open("/dev/null");
        Ok(ChildStdio {
            stdin: open()?.into(),
            stdout: open()?.into(),
            stderr: open()?.into(),
        })
    }

    fn launch(program: &str, args: &[&str]) -> Launch {
        Launch {
            program: PathBuf::from(program),
            args: std::iter::once(program)
                .chain(args.iter().copied())
                .map(OsString::from)
                .collect(),
            env: Vec::new(),
            working_dir: None,
        }
    }

    fn reap(child: &Child) -> anyhow::Result<ExitStatus> {
        let mut sleeper = child.sleeper();
        loop {
            if let Some(status) = child.try_reap()? {
                return Ok(status);
            }
            sleeper.sleep(None)?;
        }
    }

    #[test]
    fn reports_exit_code() -> anyhow::Result<()> {
        let child = spawn(&launch("/bin/sh", &["-c", "exit 7"]), null_stdio()?)?;
        assert_eq!(reap(&child)?, ExitStatus::from_code(7));
        Ok(())
    }

    #[test]
    fn missing_program_fails_through_error_channel() -> anyhow::Result<()> {
        let result = spawn(&launch("/nonexistent/subproc-program", &[]), null_stdio()?);
        assert_eq!(result.map(|_| ()), Err(Error::System(libc::ENOENT)));
        Ok(())
    }

    #[test]
    fn missing_working_directory_fails() -> anyhow::Result<()> {
        let mut launch = launch("/bin/sh", &["-c", "true"]);
        launch.working_dir = Some(PathBuf::from("/nonexistent/subproc-dir"));
        assert_eq!(spawn(&launch, null_stdio()?).map(|_| ()), Err(Error::System(libc::ENOENT)));
        Ok(())
    }

    #[test]
    fn kill_is_reported_as_signal() -> anyhow::Result<()> {
        let child = spawn(&launch("/bin/sh", &["-c", "sleep 30"]), null_stdio()?)?;
        child.kill()?;
        assert_eq!(reap(&child)?, ExitStatus::SIGKILL);
        Ok(())
    }

    #[test]
    fn interior_nul_is_invalid() {
        assert_eq!(
            ExecImage::new(&launch("/bin/sh", &["a\0b"])).map(|_| ()),
            Err(Error::InvalidArgument)
        );
    }
}
