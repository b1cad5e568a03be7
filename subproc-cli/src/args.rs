use std::ffi::OsString;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::{Parser, builder::styling};
use subproc_core::{StopAction, StopActions, Timeout};

use crate::error::CliError;
use crate::events;

const SHORT_DESCRIPTION: &str = "Run a program and reliably stop it";

const LONG_DESCRIPTION: &str = r"
subproc starts a program, forwards its standard output and standard error, and stops it
with an escalating sequence of wait, terminate and kill steps once its output ends.
";

/// Parsed command-line arguments for `subproc`.
#[derive(Parser, Debug)]
#[clap(name = "subproc",
       version,
       about = SHORT_DESCRIPTION,
       long_about = LONG_DESCRIPTION,
       author,
       styles = help_styles())]
#[allow(clippy::module_name_repetitions)]
pub struct CommandLineArgs {
    /// Working directory for the child.
    #[clap(long = "cwd", value_name = "DIR")]
    pub working_dir: Option<PathBuf>,

    /// Add or override a variable in the child's environment.
    #[clap(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_var)]
    pub env: Vec<(OsString, OsString)>,

    /// Start the child with only the variables given through `--env`.
    #[clap(long = "clear-env")]
    pub clear_env: bool,

    /// Text written to the child's standard input before it starts.
    #[clap(long = "input", value_name = "TEXT")]
    pub input: Option<String>,

    /// Connect the child's standard streams to the null device.
    #[clap(long = "discard", conflicts_with_all = ["inherit", "input"])]
    pub discard: bool,

    /// Connect the child's standard streams to this program's own.
    #[clap(long = "inherit", conflicts_with = "input")]
    pub inherit: bool,

    /// Bound on every individual read and write, in milliseconds.
    #[clap(long = "timeout", value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Overall deadline for the child, in milliseconds from its start.
    #[clap(long = "deadline", value_name = "MS")]
    pub deadline_ms: Option<u64>,

    /// Stop sequence, e.g. `wait:1000,terminate:500,kill:inf`.
    #[clap(long = "stop", value_name = "STEPS", value_parser = parse_stop_actions)]
    pub stop: Option<StopActions>,

    /// Path to a configuration file.
    #[clap(long = "config", value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// Ignore any configuration file.
    #[clap(long = "no-config", conflicts_with = "config_file")]
    pub no_config: bool,

    /// Enable debug logging for classes of events.
    #[clap(long = "log-enable", value_name = "CATEGORY")]
    pub enabled_log_events: Vec<events::TraceEvent>,

    /// Log everything at debug level.
    #[clap(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Program to run, followed by its arguments.
    // `trailing_var_arg`: everything after the program belongs to it
    #[clap(
        value_name = "PROGRAM",
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<OsString>,
}

fn parse_env_var(value: &str) -> Result<(OsString, OsString), CliError> {
    match value.split_once('=') {
        Some((key, val)) if !key.is_empty() => Ok((key.into(), val.into())),
        _ => Err(CliError::InvalidArgument(format!(
            "expected KEY=VALUE, found '{value}'"
        ))),
    }
}

/// Parses a timeout in milliseconds, or one of the keywords `inf` and `deadline`.
fn parse_timeout(value: &str) -> Result<Timeout, CliError> {
    match value {
        "inf" | "infinite" => Ok(Timeout::Infinite),
        "deadline" => Ok(Timeout::Deadline),
        millis => u64::from_str(millis)
            .map(|ms| Timeout::After(Duration::from_millis(ms)))
            .map_err(|_| CliError::InvalidArgument(format!("invalid timeout '{millis}'"))),
    }
}

fn parse_stop_action(value: &str) -> Result<StopAction, CliError> {
    let (action, timeout) = value.split_once(':').unwrap_or((value, "inf"));
    let timeout = parse_timeout(timeout)?;

    match action {
        "wait" => Ok(StopAction::wait(timeout)),
        "terminate" => Ok(StopAction::terminate(timeout)),
        "kill" => Ok(StopAction::kill(timeout)),
        other => Err(CliError::InvalidArgument(format!(
            "unknown stop action '{other}'"
        ))),
    }
}

/// Parses a comma-separated stop sequence.
pub fn parse_stop_actions(value: &str) -> Result<StopActions, CliError> {
    let steps = value
        .split(',')
        .map(str::trim)
        .filter(|step| !step.is_empty())
        .map(parse_stop_action)
        .collect::<Result<Vec<_>, _>>()?;

    if steps.is_empty() {
        return Err(CliError::InvalidArgument("empty stop sequence".into()));
    }

    StopActions::from_steps(&steps).map_err(|_| {
        CliError::InvalidArgument(format!(
            "at most {} stop steps are allowed",
            StopActions::MAX_STEPS
        ))
    })
}

/// Returns clap styling to be used for command-line help.
#[doc(hidden)]
fn help_styles() -> clap::builder::Styles {
    styling::Styles::styled()
        .header(
            styling::AnsiColor::Yellow.on_default()
                | styling::Effects::BOLD
                | styling::Effects::UNDERLINE,
        )
        .usage(styling::AnsiColor::Green.on_default() | styling::Effects::BOLD)
        .literal(styling::AnsiColor::Magenta.on_default() | styling::Effects::BOLD)
        .placeholder(styling::AnsiColor::Cyan.on_default())
}

#[allow(clippy::panic_in_result_fn)]
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use subproc_core::Stop;

    #[test]
    fn parses_stop_sequences() -> anyhow::Result<()> {
        let steps = parse_stop_actions("wait:100, terminate:deadline,kill")?;
        assert_eq!(
            steps,
            StopActions::new([
                StopAction::wait(Timeout::After(Duration::from_millis(100))),
                StopAction::terminate(Timeout::Deadline),
                StopAction::kill(Timeout::Infinite),
            ])
        );

        let single = parse_stop_actions("kill:0")?;
        assert_eq!(single.steps()[0].action, Stop::Kill);
        assert_eq!(single.steps()[1].action, Stop::Noop);
        Ok(())
    }

    #[test]
    fn rejects_bad_stop_sequences() {
        assert!(parse_stop_actions("").is_err());
        assert!(parse_stop_actions("pause:10").is_err());
        assert!(parse_stop_actions("wait:soon").is_err());
        assert!(parse_stop_actions("wait:1,wait:2,wait:3,kill:4").is_err());
    }

    #[test]
    fn parses_env_vars() -> anyhow::Result<()> {
        assert_eq!(
            parse_env_var("KEY=a=b")?,
            (OsString::from("KEY"), OsString::from("a=b"))
        );
        assert_eq!(
            parse_env_var("EMPTY=")?,
            (OsString::from("EMPTY"), OsString::new())
        );
        assert!(parse_env_var("=value").is_err());
        assert!(parse_env_var("novalue").is_err());
        Ok(())
    }

    #[test]
    fn command_keeps_its_own_flags() -> anyhow::Result<()> {
        let args = CommandLineArgs::try_parse_from([
            "subproc", "--timeout", "10", "ls", "-l", "--all",
        ])?;
        assert_eq!(args.timeout_ms, Some(10));
        assert_eq!(
            args.command,
            vec![
                OsString::from("ls"),
                OsString::from("-l"),
                OsString::from("--all")
            ]
        );
        Ok(())
    }

    #[test]
    fn command_is_required() {
        assert!(CommandLineArgs::try_parse_from(["subproc", "--verbose"]).is_err());
    }

    #[test]
    fn shorthands_conflict() {
        assert!(
            CommandLineArgs::try_parse_from(["subproc", "--inherit", "--discard", "true"])
                .is_err()
        );
    }
}
