//! Small, predictable child program driven by the subproc end-to-end tests.

use std::io::{self, Read, Write};
use std::time::Duration;

use clap::{Parser, Subcommand};

/// Helper child for exercising the subproc engine.
#[derive(Parser)]
#[clap(name = "subproc-helper", version)]
struct HelperArgs {
    #[clap(subcommand)]
    command: HelperCommand,
}

#[derive(Subcommand)]
enum HelperCommand {
    /// Copy standard input to standard output until end of input.
    Echo,
    /// Write `out` to standard output and `err` to standard error.
    Streams,
    /// Print the current working directory.
    Cwd,
    /// Sleep, then write text to standard output.
    SleepWrite {
        /// Milliseconds to sleep first.
        millis: u64,
        /// Text to write.
        text: String,
    },
    /// Ignore graceful termination requests and sleep until killed.
    IgnoreTerm,
    /// Exit with the given code.
    Exit {
        /// Exit code.
        code: i32,
    },
    /// Print the value of an environment variable, or nothing if it is unset.
    Env {
        /// Variable name.
        name: String,
    },
    /// Write to standard output until it is closed.
    Infinite,
}

fn main() -> io::Result<()> {
    let args = HelperArgs::parse();

    match args.command {
        HelperCommand::Echo => {
            let mut input = Vec::new();
            io::stdin().read_to_end(&mut input)?;
            io::stdout().write_all(&input)?;
        }
        HelperCommand::Streams => {
            io::stdout().write_all(b"out")?;
            io::stderr().write_all(b"err")?;
        }
        HelperCommand::Cwd => {
            let dir = std::env::current_dir()?;
            write!(io::stdout(), "{}", dir.display())?;
        }
        HelperCommand::SleepWrite { millis, text } => {
            std::thread::sleep(Duration::from_millis(millis));
            io::stdout().write_all(text.as_bytes())?;
        }
        HelperCommand::IgnoreTerm => {
            ignore_termination()?;
            // Let the test know the handler is in place.
            io::stdout().write_all(b"ready")?;
            io::stdout().flush()?;
            loop {
                std::thread::sleep(Duration::from_secs(60));
            }
        }
        HelperCommand::Exit { code } => std::process::exit(code),
        HelperCommand::Env { name } => {
            if let Some(value) = std::env::var_os(name) {
                io::stdout().write_all(value.as_encoded_bytes())?;
            }
        }
        HelperCommand::Infinite => {
            let chunk = [b'x'; 4096];
            let mut stdout = io::stdout().lock();
            loop {
                if let Err(e) = stdout.write_all(&chunk) {
                    return if e.kind() == io::ErrorKind::BrokenPipe {
                        Ok(())
                    } else {
                        Err(e)
                    };
                }
            }
        }
    }

    io::stdout().flush()
}

#[cfg(unix)]
fn ignore_termination() -> io::Result<()> {
    use nix::sys::signal::{SigHandler, Signal, signal};

    // SAFETY: installing `SIG_IGN` runs no code in signal context.
    unsafe { signal(Signal::SIGTERM, SigHandler::SigIgn) }
        .map(|_| ())
        .map_err(io::Error::from)
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
const fn ignore_termination() -> io::Result<()> {
    // Not supported; a console break still ends the helper.
    Ok(())
}
