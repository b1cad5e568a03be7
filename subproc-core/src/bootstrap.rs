//! Everything the platform layer needs to create a child, resolved ahead of time.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::options::{self, Environment};
use crate::sys;

/// A fully resolved child program invocation.
#[derive(Clone, Debug)]
pub(crate) struct Launch {
    /// Path handed to the OS loader.
    pub program: PathBuf,
    /// Argument vector, starting with the program name exactly as given.
    pub args: Vec<OsString>,
    /// The child's complete environment.
    pub env: Vec<(OsString, OsString)>,
    pub working_dir: Option<PathBuf>,
}

/// The child's ends of its three standard streams.
#[derive(Debug)]
pub(crate) struct ChildStdio {
    pub stdin: sys::stdio::ChildEnd,
    pub stdout: sys::stdio::ChildEnd,
    pub stderr: sys::stdio::ChildEnd,
}

impl Launch {
    pub fn new<S: AsRef<OsStr>>(
        command: &[S],
        environment: &Environment,
        working_dir: Option<&Path>,
    ) -> Result<Self> {
        let Some(program) = command.first().map(AsRef::as_ref) else {
            return Err(Error::InvalidArgument);
        };
        if program.is_empty() {
            return Err(Error::InvalidArgument);
        }

        let env = environment.resolve();
        let search_path = env
            .iter()
            .find(|(key, _)| options::is_same_variable(key, OsStr::new("PATH")))
            .map(|(_, value)| value.clone())
            .or_else(default_search_path);

        Ok(Self {
            program: resolve_program(program, search_path.as_deref(), working_dir)?,
            args: command.iter().map(|arg| arg.as_ref().to_owned()).collect(),
            env,
            working_dir: working_dir.map(Path::to_path_buf),
        })
    }
}

/// Search path used when the child's environment has no `PATH`.
#[cfg(unix)]
fn default_search_path() -> Option<OsString> {
    Some("/bin:/usr/bin".into())
}

#[cfg(windows)]
fn default_search_path() -> Option<OsString> {
    std::env::var_os("PATH")
}

/// Works out which file the loader should execute.
///
/// A bare name is searched for in `search_path` only; a name that cannot be found there fails
/// with a not-found error rather than being looked up in the child's working directory. A
/// relative path with a directory component is anchored to this process's working directory,
/// since the child changes into its own working directory before the program is loaded.
fn resolve_program(
    program: &OsStr,
    search_path: Option<&OsStr>,
    working_dir: Option<&Path>,
) -> Result<PathBuf> {
    let path = Path::new(program);

    if path.components().count() > 1 || path.is_absolute() {
        if working_dir.is_some() && path.is_relative() {
            return Ok(std::env::current_dir()?.join(path));
        }
        return Ok(path.to_path_buf());
    }

    let cwd = std::env::current_dir()?;
    match which::which_in(program, search_path, cwd) {
        Ok(resolved) => Ok(resolved),
        Err(e) => {
            tracing::debug!(
                target: crate::trace_categories::PROCESS,
                "could not find {}: {e}",
                path.display()
            );
            Err(Error::System(sys::errno::NOT_FOUND))
        }
    }
}

#[allow(clippy::panic_in_result_fn)]
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_command_is_rejected() {
        let command: [&str; 0] = [];
        assert_eq!(
            Launch::new(&command, &Environment::Inherit, None).map(|_| ()),
            Err(Error::InvalidArgument)
        );
        assert_eq!(
            Launch::new(&[""], &Environment::Inherit, None).map(|_| ()),
            Err(Error::InvalidArgument)
        );
    }

    #[test]
    fn relative_path_is_anchored_when_changing_directory() -> anyhow::Result<()> {
        let program = Path::new("bin").join("tool");
        let resolved = resolve_program(program.as_os_str(), None, Some(Path::new("/")))?;
        assert_eq!(resolved, std::env::current_dir()?.join(&program));

        let untouched = resolve_program(program.as_os_str(), None, None)?;
        assert_eq!(untouched, program);
        Ok(())
    }

    #[test]
    fn unknown_bare_name_is_not_found() {
        let name = OsStr::new("subproc-no-such-program");
        assert_eq!(
            resolve_program(name, Some(OsStr::new("")), None),
            Err(Error::System(sys::errno::NOT_FOUND))
        );
    }

    #[test]
    fn arguments_keep_program_name() -> anyhow::Result<()> {
        let program = std::env::current_exe()?;
        let command = [program.as_os_str(), OsStr::new("a"), OsStr::new("b")];
        let launch = Launch::new(&command, &Environment::Inherit, None)?;
        assert_eq!(launch.program, program);
        assert_eq!(launch.args, command);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn bare_name_is_searched() -> anyhow::Result<()> {
        let resolved = resolve_program(OsStr::new("sh"), Some(OsStr::new("/bin:/usr/bin")), None)?;
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("sh"));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn bare_name_is_not_taken_from_working_directory() -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = std::env::temp_dir().join(format!("subproc-resolve-{}", std::process::id()));
        std::fs::create_dir_all(&dir)?;
        let script = dir.join("subproc-local-tool");
        std::fs::write(&script, "#!/bin/sh\nexit 42\n")?;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))?;

        let resolved = resolve_program(
            OsStr::new("subproc-local-tool"),
            Some(OsStr::new("/bin:/usr/bin")),
            Some(&dir),
        );
        std::fs::remove_dir_all(&dir)?;

        assert_eq!(resolved, Err(Error::System(sys::errno::NOT_FOUND)));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn empty_environment_uses_default_search_path() -> anyhow::Result<()> {
        let launch = Launch::new(&["sh", "-c", "exit 5"], &Environment::Replace(vec![]), None)?;
        assert!(launch.program.is_absolute());
        assert!(launch.env.is_empty());
        Ok(())
    }
}
