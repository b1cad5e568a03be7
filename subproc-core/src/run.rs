use std::ffi::OsStr;
use std::io::Write;

use crate::error::Result;
use crate::options::Options;
use crate::process::Process;
use crate::redirect::Stream;
use crate::status::ExitStatus;

/// Runs `command` to completion.
///
/// The child is started with `options` and its standard input is closed right away (any
/// [`Options::input`] has been delivered by then). Its standard output and standard error are
/// copied into `out` and `err` until both are closed, after which the child is stopped with
/// the stop sequence from the options and its exit status returned.
pub fn run<S: AsRef<OsStr>>(
    command: &[S],
    options: Options,
    out: &mut impl Write,
    err: &mut impl Write,
) -> Result<ExitStatus> {
    let stop = options.stop.or_default();

    let mut process = Process::new();
    process.start(command, options)?;
    process.close(Stream::In)?;
    process.drain(out, err)?;
    process.stop(stop)
}
