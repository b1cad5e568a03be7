//! End-to-end tests of fork mode.

#![cfg(unix)]
#![allow(clippy::panic_in_result_fn)]

mod common;

use common::read_to_end;
use pretty_assertions::assert_eq;
use subproc_core::{Error, ExitStatus, ForkRole, Options, Process, Stream, Timeout};

/// Leaves the forked child without running anything else from the test harness.
fn exit_child(code: i32) -> ! {
    // SAFETY: `_exit` skips atexit handlers and destructors, which must not run in the child.
    unsafe { nix::libc::_exit(code) }
}

#[test]
fn forked_child_talks_to_parent() -> anyhow::Result<()> {
    let mut process = Process::new();

    match process.fork(Options::default())? {
        ForkRole::Child => {
            let code = match nix::unistd::write(std::io::stdout(), b"forked") {
                Ok(6) => 0,
                _ => 1,
            };
            exit_child(code);
        }
        ForkRole::Parent => {
            let (out, _) = read_to_end(&process)?;
            assert_eq!(out, b"forked");
            assert_eq!(process.wait(Timeout::Infinite)?, ExitStatus::from_code(0));
        }
    }
    Ok(())
}

#[test]
fn forked_child_record_is_inert() -> anyhow::Result<()> {
    let mut process = Process::new();

    match process.fork(Options::builder().discard(true).build())? {
        ForkRole::Child => {
            let inert = process.pid().is_none()
                && process.close(Stream::In) == Err(Error::InvalidArgument)
                && process.kill() == Err(Error::InvalidArgument);
            exit_child(if inert { 0 } else { 1 });
        }
        ForkRole::Parent => {
            assert!(process.pid().is_some());
            assert_eq!(process.wait(Timeout::Infinite)?, ExitStatus::from_code(0));
        }
    }
    Ok(())
}

#[test]
fn fork_rejects_invalid_options() {
    let mut process = Process::new();
    let options = Options::builder().input(Vec::new()).build();
    assert_eq!(process.fork(options).map(|_| ()), Err(Error::InvalidArgument));
}
