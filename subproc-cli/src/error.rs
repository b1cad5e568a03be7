use crate::config::ConfigLoadError;

/// Errors reported by the `subproc` command.
#[derive(thiserror::Error, Debug)]
pub enum CliError {
    /// A command-line value could not be interpreted.
    #[error("{0}")]
    InvalidArgument(String),

    /// An explicitly requested configuration file could not be loaded.
    #[error("{path}: {source}")]
    Config {
        /// Path of the configuration file.
        path: std::path::PathBuf,
        /// The underlying failure.
        #[source]
        source: ConfigLoadError,
    },

    /// The engine failed to run the child.
    #[error(transparent)]
    Engine(#[from] subproc_core::Error),

    /// Forwarding the child's output failed.
    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

impl CliError {
    /// Exit code reported for this error.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Engine(subproc_core::Error::TimedOut) => 124,
            Self::InvalidArgument(_) => 2,
            _ => 1,
        }
    }
}
