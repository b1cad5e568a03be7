//! End-to-end tests of stop sequences.

#![allow(clippy::panic_in_result_fn)]

mod common;

use std::time::{Duration, Instant};

use common::helper;
use pretty_assertions::assert_eq;
use subproc_core::{Error, ExitStatus, Options, Process, StopAction, StopActions, Timeout};

fn millis(ms: u64) -> Timeout {
    Timeout::After(Duration::from_millis(ms))
}

/// Starts the helper that ignores termination requests, returning once it is ready.
fn stubborn_child(options: Options) -> anyhow::Result<Process> {
    let mut process = Process::new();
    process.start(&helper(&["ignore-term"]), options)?;

    let mut ready = Vec::new();
    let mut buffer = [0u8; 16];
    while ready.len() < b"ready".len() {
        let (_, count) = process.read(&mut buffer)?;
        ready.extend_from_slice(&buffer[..count]);
    }
    assert_eq!(ready, b"ready");

    Ok(process)
}

#[cfg(unix)]
#[test]
fn escalates_to_kill() -> anyhow::Result<()> {
    let process = stubborn_child(Options::default())?;

    let started = Instant::now();
    let status = process.stop(StopActions::new([
        StopAction::terminate(millis(50)),
        StopAction::kill(millis(50)),
        StopAction::noop(),
    ]))?;

    assert_eq!(status, ExitStatus::SIGKILL);
    assert!(started.elapsed() < Duration::from_secs(5));
    Ok(())
}

#[cfg(unix)]
#[test]
fn terminate_reports_sigterm() -> anyhow::Result<()> {
    let mut process = Process::new();
    process.start(&helper(&["sleep-write", "5000", "late"]), Options::default())?;

    let status = process.stop(StopActions::new([
        StopAction::terminate(millis(2000)),
        StopAction::kill(Timeout::Infinite),
        StopAction::noop(),
    ]))?;
    assert_eq!(status, ExitStatus::SIGTERM);
    Ok(())
}

#[test]
fn wait_step_collects_normal_exit() -> anyhow::Result<()> {
    let mut process = Process::new();
    process.start(&helper(&["exit", "3"]), Options::default())?;

    let status = process.stop(StopActions::new([
        StopAction::wait(Timeout::Infinite),
        StopAction::kill(Timeout::Infinite),
        StopAction::noop(),
    ]))?;
    assert_eq!(status, ExitStatus::from_code(3));
    Ok(())
}

#[test]
fn exhausted_sequence_times_out() -> anyhow::Result<()> {
    let mut process = Process::new();
    process.start(&helper(&["infinite"]), Options::default())?;

    let sequence = StopActions::new([
        StopAction::wait(millis(20)),
        StopAction::noop(),
        StopAction::wait(millis(20)),
    ]);
    assert_eq!(process.stop(sequence), Err(Error::TimedOut));
    assert!(process.is_running());

    process.kill()?;
    assert_eq!(process.wait(Timeout::Infinite)?, ExitStatus::SIGKILL);
    Ok(())
}

#[test]
fn deadline_step_waits_until_deadline() -> anyhow::Result<()> {
    let mut process = Process::new();
    process.start(
        &helper(&["infinite"]),
        Options::builder().deadline(Duration::from_millis(100)).build(),
    )?;

    let status = process.stop(StopActions::new([
        StopAction::wait(Timeout::Deadline),
        StopAction::kill(Timeout::Infinite),
        StopAction::noop(),
    ]))?;
    assert_eq!(status, ExitStatus::SIGKILL);
    Ok(())
}

#[test]
fn drop_runs_configured_sequence() -> anyhow::Result<()> {
    let options = Options::builder()
        .stop(StopActions::new([
            StopAction::kill(Timeout::Infinite),
            StopAction::noop(),
            StopAction::noop(),
        ]))
        .build();
    let process = stubborn_child(options)?;

    let started = Instant::now();
    process.destroy();
    assert!(started.elapsed() < Duration::from_secs(5));
    Ok(())
}

#[test]
fn drop_closes_stdin_before_stopping() -> anyhow::Result<()> {
    // With the default sequence, the echo helper only exits once its input ends.
    let mut process = Process::new();
    process.start(&helper(&["echo"]), Options::default())?;

    let started = Instant::now();
    drop(process);
    assert!(started.elapsed() < Duration::from_secs(10));
    Ok(())
}
