//! Configuration file support for `subproc`.
//!
//! Settings are layered: defaults < config file < command-line arguments. Unknown keys are
//! ignored, and a broken config file at the default location only produces a warning.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use etcetera::BaseStrategy;
use subproc_core::{Environment, Options, StopActions};

use crate::args::{CommandLineArgs, parse_stop_actions};
use crate::error::CliError;

/// Root configuration structure.
#[derive(Debug, Default, Clone, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    /// How the child is started and stopped.
    pub process: ProcessConfig,

    /// Variables added to the child's environment. Command-line `--env` values win.
    pub env: BTreeMap<String, String>,
}

/// Process configuration options.
#[derive(Debug, Default, Clone, serde::Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Per-call I/O timeout in milliseconds.
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: Option<u64>,

    /// Deadline in milliseconds from the child's start.
    #[serde(rename = "deadline-ms")]
    pub deadline_ms: Option<u64>,

    /// Stop sequence, in the same syntax as `--stop`.
    pub stop: Option<String>,

    /// Connect the child's streams to the null device.
    pub discard: Option<bool>,

    /// Connect the child's streams to ours.
    pub inherit: Option<bool>,

    /// Start the child with only the configured variables.
    #[serde(rename = "clear-env")]
    pub clear_env: Option<bool>,

    /// Working directory for the child.
    pub cwd: Option<PathBuf>,
}

impl Config {
    /// Builds engine options, letting explicitly given command-line arguments win over the
    /// configuration file.
    pub fn to_options(&self, args: &CommandLineArgs) -> Result<Options, CliError> {
        let stop = match (args.stop, &self.process.stop) {
            (Some(stop), _) => stop,
            (None, Some(text)) => parse_stop_actions(text)?,
            (None, None) => StopActions::default(),
        };

        let mut vars: Vec<(OsString, OsString)> = self
            .env
            .iter()
            .filter(|(key, _)| !args.env.iter().any(|(name, _)| name.as_os_str() == key.as_str()))
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        vars.extend(args.env.iter().cloned());

        let clear_env = merge_bool_setting(args.clear_env, false, self.process.clear_env);
        let environment = if clear_env {
            Environment::Replace(vars)
        } else if vars.is_empty() {
            Environment::Inherit
        } else {
            Environment::Extend(vars)
        };

        let inherit = merge_bool_setting(args.inherit, false, self.process.inherit);
        let discard = merge_bool_setting(args.discard, false, self.process.discard);
        if inherit && discard {
            return Err(CliError::InvalidArgument(
                "the inherit and discard settings cannot both be enabled".into(),
            ));
        }
        if args.input.is_some() && (inherit || discard) {
            let setting = if inherit { "inherit" } else { "discard" };
            return Err(CliError::InvalidArgument(format!(
                "--input cannot be used with the {setting} setting"
            )));
        }

        let millis =
            |cli: Option<u64>, config: Option<u64>| cli.or(config).map(Duration::from_millis);

        Ok(Options::builder()
            .environment(environment)
            .maybe_working_dir(args.working_dir.clone().or_else(|| self.process.cwd.clone()))
            .inherit(inherit)
            .discard(discard)
            .maybe_input(args.input.as_ref().map(|text| text.as_bytes().to_vec()))
            .stop(stop)
            .maybe_timeout(millis(args.timeout_ms, self.process.timeout_ms))
            .maybe_deadline(millis(args.deadline_ms, self.process.deadline_ms))
            .build())
    }
}

/// Merges a boolean setting from CLI args, config file, and defaults.
///
/// A flag that differs from its default was given explicitly and wins; otherwise the config
/// value is used if present.
const fn merge_bool_setting(
    cli_value: bool,
    cli_default: bool,
    config_value: Option<bool>,
) -> bool {
    if cli_value != cli_default {
        cli_value
    } else if let Some(config) = config_value {
        config
    } else {
        cli_default
    }
}

/// Result of attempting to load a configuration file.
#[derive(Debug)]
pub struct ConfigLoadResult {
    /// The loaded configuration, or default if loading failed.
    pub config: Config,

    /// The path that was used (or attempted) for loading.
    pub path: Option<PathBuf>,

    /// Any error that occurred during loading.
    pub error: Option<ConfigLoadError>,

    /// Whether the path was given with `--config`, making errors fatal.
    pub explicit_path: bool,
}

/// Errors that can occur when loading configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigLoadError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    Io(#[source] std::io::Error),

    /// Failed to parse the TOML content.
    #[error("failed to parse config file: {0}")]
    Parse(#[source] toml::de::Error),
}

/// Returns the default configuration file path for the current platform, if one can be
/// determined.
pub fn default_config_path() -> Option<PathBuf> {
    let strategy = etcetera::choose_base_strategy().ok()?;
    Some(strategy.config_dir().join("subproc").join("config.toml"))
}

/// Loads configuration from the specified path.
pub fn load_from_path(path: &Path) -> ConfigLoadResult {
    let loaded = std::fs::read_to_string(path)
        .map_err(ConfigLoadError::Io)
        .and_then(|content| toml::from_str(&content).map_err(ConfigLoadError::Parse));

    let (config, error) = match loaded {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    ConfigLoadResult {
        config,
        path: Some(path.to_path_buf()),
        error,
        explicit_path: false,
    }
}

/// Loads configuration from `explicit_path`, or from the default location when none is
/// given. A missing file at the default location silently yields defaults.
pub fn load_config(disabled: bool, explicit_path: Option<&Path>) -> ConfigLoadResult {
    let defaults = |path| ConfigLoadResult {
        config: Config::default(),
        path,
        error: None,
        explicit_path: false,
    };

    if disabled {
        return defaults(None);
    }

    let Some(path) = explicit_path
        .map(Path::to_path_buf)
        .or_else(default_config_path)
    else {
        return defaults(None);
    };

    let is_explicit = explicit_path.is_some();
    if !is_explicit && !path.exists() {
        return defaults(Some(path));
    }

    let mut result = load_from_path(&path);
    result.explicit_path = is_explicit;
    result
}
