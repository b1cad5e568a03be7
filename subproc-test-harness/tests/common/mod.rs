//! Shared helpers for the end-to-end tests.

#![allow(dead_code)]

use std::ffi::OsString;

/// Builds the command line running `subproc-helper` with the given arguments.
pub fn helper(args: &[&str]) -> Vec<OsString> {
    std::iter::once(OsString::from(env!("CARGO_BIN_EXE_subproc-helper")))
        .chain(args.iter().map(OsString::from))
        .collect()
}

/// Reads from `process` until both output streams are closed, returning what each stream
/// produced.
pub fn read_to_end(process: &subproc_core::Process) -> subproc_core::Result<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    let mut err = Vec::new();
    process.drain(&mut out, &mut err)?;
    Ok((out, err))
}

/// Number of descriptors currently open in this process.
#[cfg(target_os = "linux")]
pub fn open_descriptors() -> std::io::Result<usize> {
    Ok(std::fs::read_dir("/proc/self/fd")?.count())
}
