//! Configuration of a child process.

use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::redirect::Redirect;
use crate::stop::StopActions;

/// The environment a child starts with.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Environment {
    /// A copy of this process's environment.
    #[default]
    Inherit,
    /// A copy of this process's environment, with the given variables added or replaced.
    Extend(Vec<(OsString, OsString)>),
    /// Exactly the given variables.
    Replace(Vec<(OsString, OsString)>),
}

impl Environment {
    /// Computes the child's complete environment.
    pub(crate) fn resolve(&self) -> Vec<(OsString, OsString)> {
        match self {
            Self::Inherit => std::env::vars_os().collect(),
            Self::Extend(vars) => {
                let mut env: Vec<_> = std::env::vars_os()
                    .filter(|(key, _)| !vars.iter().any(|(name, _)| is_same_variable(name, key)))
                    .collect();
                env.extend(vars.iter().cloned());
                env
            }
            Self::Replace(vars) => vars.clone(),
        }
    }
}

/// Whether two names refer to the same environment variable. Names are case-insensitive on
/// Windows.
#[cfg(unix)]
pub(crate) fn is_same_variable(a: &OsStr, b: &OsStr) -> bool {
    a == b
}

#[cfg(windows)]
pub(crate) fn is_same_variable(a: &OsStr, b: &OsStr) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Per-stream redirects. Streams left unset are connected to pipes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Redirects {
    /// Target of the child's standard input.
    pub stdin: Option<Redirect>,
    /// Target of the child's standard output.
    pub stdout: Option<Redirect>,
    /// Target of the child's standard error.
    pub stderr: Option<Redirect>,
}

impl Redirects {
    fn is_empty(&self) -> bool {
        self.stdin.is_none() && self.stdout.is_none() && self.stderr.is_none()
    }

    fn all(redirect: &Redirect) -> Self {
        Self {
            stdin: Some(redirect.clone()),
            stdout: Some(redirect.clone()),
            stderr: Some(redirect.clone()),
        }
    }
}

/// Options for starting a child process.
#[derive(Clone, Debug, Default, bon::Builder)]
pub struct Options {
    /// The child's environment.
    #[builder(default)]
    pub environment: Environment,

    /// The child's working directory. Defaults to this process's working directory.
    #[builder(into)]
    pub working_dir: Option<PathBuf>,

    /// Per-stream redirects. Mutually exclusive with `inherit` and `discard`.
    #[builder(default)]
    pub redirect: Redirects,

    /// Connect all three streams to this process's own streams.
    #[builder(default)]
    pub inherit: bool,

    /// Connect all three streams to the null device.
    #[builder(default)]
    pub discard: bool,

    /// Bytes made available on the child's standard input before it starts. Standard input
    /// is closed once they have been written. Must not be empty, and requires standard input
    /// to be a pipe.
    #[builder(into)]
    pub input: Option<Vec<u8>>,

    /// Stop sequence run when a still-running process is dropped. A sequence made only of
    /// no-op steps is replaced with the default one.
    #[builder(default)]
    pub stop: StopActions,

    /// Bound on every individual read and write. `None` blocks indefinitely; zero polls.
    pub timeout: Option<Duration>,

    /// Overall deadline, measured from the moment the child is started.
    pub deadline: Option<Duration>,
}

/// Options checked for consistency, with every shorthand expanded.
#[derive(Debug)]
pub(crate) struct Resolved {
    pub environment: Environment,
    pub working_dir: Option<PathBuf>,
    pub stdin: Redirect,
    pub stdout: Redirect,
    pub stderr: Redirect,
    pub input: Option<Vec<u8>>,
    pub stop: StopActions,
    pub timeout: Option<Duration>,
    pub deadline: Option<Duration>,
}

impl Options {
    /// Checks the options for contradictions before any resource is created.
    pub(crate) fn resolve(self) -> Result<Resolved> {
        let redirect = match (self.inherit, self.discard) {
            (true, true) => return Err(Error::InvalidArgument),
            (true, false) | (false, true) if !self.redirect.is_empty() => {
                return Err(Error::InvalidArgument);
            }
            (true, false) => Redirects::all(&Redirect::Inherit),
            (false, true) => Redirects::all(&Redirect::Discard),
            (false, false) => self.redirect,
        };

        if let Some(input) = &self.input {
            if input.is_empty() || redirect.stdin.is_some() {
                return Err(Error::InvalidArgument);
            }
        }

        let stdin = redirect.stdin.unwrap_or_default();
        let stdout = redirect.stdout.unwrap_or_default();
        let stderr = redirect.stderr.unwrap_or_default();

        if stdin == Redirect::Stdout || stdout == Redirect::Stdout {
            return Err(Error::InvalidArgument);
        }

        Ok(Resolved {
            environment: self.environment,
            working_dir: self.working_dir,
            stdin,
            stdout,
            stderr,
            input: self.input,
            stop: self.stop.or_default(),
            timeout: self.timeout,
            deadline: self.deadline,
        })
    }
}

#[allow(clippy::panic_in_result_fn)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::stop::StopAction;
    use crate::timing::Timeout;
    use pretty_assertions::assert_eq;

    #[test]
    fn extend_replaces_inherited_variable() {
        let env = Environment::Extend(vec![("PATH".into(), "/subproc".into())]).resolve();
        let paths: Vec<&OsString> = env
            .iter()
            .filter(|(key, _)| key == "PATH")
            .map(|(_, value)| value)
            .collect();
        assert_eq!(paths, [&OsString::from("/subproc")]);
    }

    #[cfg(unix)]
    #[test]
    fn variable_names_are_case_sensitive() {
        assert!(is_same_variable(OsStr::new("PATH"), OsStr::new("PATH")));
        assert!(!is_same_variable(OsStr::new("Path"), OsStr::new("PATH")));
    }

    #[cfg(windows)]
    #[test]
    fn variable_names_ignore_case() {
        assert!(is_same_variable(OsStr::new("Path"), OsStr::new("PATH")));

        let env = Environment::Extend(vec![("path".into(), "C:\\subproc".into())]).resolve();
        let paths: Vec<_> = env
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case("PATH"))
            .collect();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].1, "C:\\subproc");
    }

    #[test]
    fn defaults_to_pipes() -> anyhow::Result<()> {
        let resolved = Options::default().resolve()?;
        assert_eq!(resolved.stdin, Redirect::Pipe);
        assert_eq!(resolved.stdout, Redirect::Pipe);
        assert_eq!(resolved.stderr, Redirect::Pipe);
        assert_eq!(resolved.stop, StopActions::default());
        Ok(())
    }

    #[test]
    fn shorthands_expand() -> anyhow::Result<()> {
        let inherited = Options::builder().inherit(true).build().resolve()?;
        assert_eq!(inherited.stdout, Redirect::Inherit);

        let discarded = Options::builder().discard(true).build().resolve()?;
        assert_eq!(discarded.stdin, Redirect::Discard);
        Ok(())
    }

    #[test]
    fn contradictory_redirects_are_rejected() {
        let both = Options::builder().inherit(true).discard(true).build();
        assert_eq!(both.resolve().map(|_| ()), Err(Error::InvalidArgument));

        let mixed = Options::builder()
            .discard(true)
            .redirect(Redirects {
                stdout: Some(Redirect::Inherit),
                ..Redirects::default()
            })
            .build();
        assert_eq!(mixed.resolve().map(|_| ()), Err(Error::InvalidArgument));
    }

    #[test]
    fn input_requires_a_stdin_pipe() {
        let redirected = Options::builder()
            .input(b"data")
            .redirect(Redirects {
                stdin: Some(Redirect::Discard),
                ..Redirects::default()
            })
            .build();
        assert_eq!(redirected.resolve().map(|_| ()), Err(Error::InvalidArgument));

        let inherited = Options::builder().input(b"data").inherit(true).build();
        assert_eq!(inherited.resolve().map(|_| ()), Err(Error::InvalidArgument));

        let empty = Options::builder().input(Vec::new()).build();
        assert_eq!(empty.resolve().map(|_| ()), Err(Error::InvalidArgument));
    }

    #[test]
    fn only_stderr_can_follow_stdout() {
        let options = Options::builder()
            .redirect(Redirects {
                stdout: Some(Redirect::Stdout),
                ..Redirects::default()
            })
            .build();
        assert_eq!(options.resolve().map(|_| ()), Err(Error::InvalidArgument));
    }

    #[test]
    fn all_noop_stop_uses_default() -> anyhow::Result<()> {
        let options = Options::builder()
            .stop(StopActions::new([StopAction::noop(); 3]))
            .build();
        assert_eq!(options.resolve()?.stop, StopActions::default());

        let custom = StopActions::new([
            StopAction::kill(Timeout::Infinite),
            StopAction::noop(),
            StopAction::noop(),
        ]);
        let options = Options::builder().stop(custom).build();
        assert_eq!(options.resolve()?.stop, custom);
        Ok(())
    }

    #[test]
    fn extended_environment_overrides() {
        let env = Environment::Extend(vec![("SUBPROC_TEST_VAR".into(), "1".into())]).resolve();
        let matches: Vec<_> = env
            .iter()
            .filter(|(key, _)| key == "SUBPROC_TEST_VAR")
            .collect();
        assert_eq!(matches.len(), 1);

        let replaced = Environment::Replace(vec![("ONLY".into(), "x".into())]).resolve();
        assert_eq!(replaced, vec![(OsString::from("ONLY"), OsString::from("x"))]);
    }
}
