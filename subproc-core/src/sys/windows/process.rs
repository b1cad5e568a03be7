//! Child creation, signalling and reaping on Windows.
//!
//! Children are created in a new process group so that a console break can be delivered to
//! them alone. A forced kill makes the child exit with the same status a POSIX child killed
//! by `SIGKILL` reports.

use std::os::windows::io::AsRawHandle;
use std::os::windows::process::CommandExt;
use std::time::Duration;

use windows::Win32::Foundation::{HANDLE, WAIT_FAILED, WAIT_OBJECT_0};
use windows::Win32::System::Console::{CTRL_BREAK_EVENT, GenerateConsoleCtrlEvent};
use windows::Win32::System::Threading::{
    CREATE_NEW_PROCESS_GROUP, GetExitCodeProcess, INFINITE, TerminateProcess,
    WaitForSingleObject,
};

use crate::bootstrap::{ChildStdio, Launch};
use crate::error::Result;
use crate::status::ExitStatus;

/// A child process created by this process.
#[derive(Debug)]
pub(crate) struct Child {
    inner: std::process::Child,
}

impl Child {
    pub fn id(&self) -> u32 {
        self.inner.id()
    }

    fn handle(&self) -> HANDLE {
        HANDLE(self.inner.as_raw_handle())
    }

    /// Collects the child's exit status if it has exited, without blocking.
    pub fn try_reap(&self) -> Result<Option<ExitStatus>> {
        // SAFETY: the process handle stays open for as long as `inner` lives.
        let event = unsafe { WaitForSingleObject(self.handle(), 0) };
        if event == WAIT_FAILED {
            return Err(std::io::Error::last_os_error().into());
        }
        if event != WAIT_OBJECT_0 {
            return Ok(None);
        }

        let mut code = 0u32;
        // SAFETY: the handle is valid and `code` outlives the call.
        unsafe { GetExitCodeProcess(self.handle(), &raw mut code)? };

        Ok(Some(ExitStatus::from_windows_code(code)))
    }

    /// Asks the child to exit by sending a console break to its process group.
    pub fn terminate(&self) -> Result<()> {
        if self.try_reap()?.is_some() {
            return Ok(());
        }

        // SAFETY: the child leads its own process group, whose id is its process id.
        unsafe { GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, self.id())? };
        Ok(())
    }

    /// Forcibly stops the child.
    pub fn kill(&self) -> Result<()> {
        #[allow(clippy::cast_sign_loss)]
        let code = ExitStatus::SIGKILL.code() as u32;

        // SAFETY: the process handle stays open for as long as `inner` lives.
        match unsafe { TerminateProcess(self.handle(), code) } {
            Ok(()) => Ok(()),
            // Access is denied once the child is already exiting.
            Err(_) if self.try_reap()?.is_some() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn sleeper(&self) -> Sleeper {
        Sleeper {
            handle: self.handle(),
        }
    }
}

/// Blocks on a child's process handle.
#[derive(Debug)]
pub(crate) struct Sleeper {
    handle: HANDLE,
}

impl Sleeper {
    /// Blocks until the child exits or `limit` elapses. The caller re-checks the child
    /// afterwards.
    pub fn sleep(&mut self, limit: Option<Duration>) -> Result<()> {
        let millis = limit.map_or(INFINITE, |limit| {
            u32::try_from(limit.as_millis()).map_or(INFINITE - 1, |ms| ms.min(INFINITE - 1))
        });

        // SAFETY: waits are serialized with the transition that closes the handle.
        let event = unsafe { WaitForSingleObject(self.handle, millis) };
        if event == WAIT_FAILED {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }
}

/// Creates a child running `launch` with the given standard streams.
pub(crate) fn spawn(launch: &Launch, stdio: ChildStdio) -> Result<Child> {
    let mut command = std::process::Command::new(&launch.program);
    command
        .args(launch.args.iter().skip(1))
        .env_clear()
        .envs(launch.env.iter().map(|(key, value)| (key, value)))
        .stdin(std::process::Stdio::from(stdio.stdin))
        .stdout(std::process::Stdio::from(stdio.stdout))
        .stderr(std::process::Stdio::from(stdio.stderr))
        .creation_flags(CREATE_NEW_PROCESS_GROUP.0);

    if let Some(working_dir) = &launch.working_dir {
        command.current_dir(working_dir);
    }

    Ok(Child {
        inner: command.spawn()?,
    })
}
