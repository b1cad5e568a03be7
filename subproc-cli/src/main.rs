//! Implements the `subproc` command: runs one program through the subproc engine.

mod args;
mod config;
mod error;
mod events;

use std::io::Write;

use clap::Parser;
use subproc_core::ExitStatus;

use crate::args::CommandLineArgs;
use crate::error::CliError;

/// Main entry point for `subproc`.
fn main() {
    //
    // Set up panic handler. On release builds, it will capture panic details to a
    // temporary .toml file and report a human-readable message to the screen.
    //
    human_panic::setup_panic!(
        human_panic::Metadata::new(env!("CARGO_BIN_NAME"), env!("CARGO_PKG_VERSION"))
            .homepage(env!("CARGO_PKG_REPOSITORY"))
            .support(
                "please post a GitHub issue at https://github.com/subproc-rs/subproc/issues/new",
            )
    );

    let args = CommandLineArgs::parse();
    let _trace_config = events::TraceEventConfig::init(&args.enabled_log_events, args.verbose);

    let exit_code = match run(&args) {
        Ok(status) => exit_code_for(status),
        Err(e) => {
            eprintln!("subproc: {e}");
            e.exit_code()
        }
    };

    std::process::exit(exit_code);
}

/// Runs the requested command, forwarding its output to our own standard streams.
fn run(args: &CommandLineArgs) -> Result<ExitStatus, CliError> {
    let loaded = config::load_config(args.no_config, args.config_file.as_deref());

    if let Some(source) = loaded.error {
        let path = loaded.path.unwrap_or_default();
        if loaded.explicit_path {
            return Err(CliError::Config { path, source });
        }
        tracing::warn!("{}: {source}; using defaults", path.display());
    }

    let options = loaded.config.to_options(args)?;
    tracing::debug!(target: subproc_core::trace_categories::PROCESS, "options: {options:?}");

    let mut stdout = std::io::stdout().lock();
    let mut stderr = std::io::stderr().lock();

    let status = subproc_core::run(&args.command, options, &mut stdout, &mut stderr)?;

    stdout.flush()?;
    stderr.flush()?;

    Ok(status)
}

/// Maps a child's exit status onto the conventional shell exit code range.
fn exit_code_for(status: ExitStatus) -> i32 {
    match status.signal() {
        Some(signal) => signal.saturating_add(128).min(255),
        None => status.code().clamp(0, 255),
    }
}
