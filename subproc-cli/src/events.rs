use std::collections::HashSet;
use std::fmt::Display;

use subproc_core::trace_categories;
use tracing_subscriber::{Layer, filter::Targets, layer::SubscriberExt, util::SubscriberInitExt};

/// Type of event to trace.
#[derive(Clone, Debug, Eq, Hash, PartialEq, clap::ValueEnum)]
pub enum TraceEvent {
    /// Traces process start, exit and release.
    #[clap(name = "process")]
    Process,
    /// Traces reads and writes on the child's pipes.
    #[clap(name = "pipe")]
    Pipe,
    /// Traces stop sequence steps.
    #[clap(name = "stop")]
    Stop,
}

impl Display for TraceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Process => write!(f, "process"),
            Self::Pipe => write!(f, "pipe"),
            Self::Stop => write!(f, "stop"),
        }
    }
}

#[derive(Default)]
pub(crate) struct TraceEventConfig {
    enabled_trace_events: HashSet<TraceEvent>,
    verbose: bool,
}

impl TraceEventConfig {
    /// Installs a stderr subscriber for the given events.
    pub fn init(enabled_log_events: &[TraceEvent], verbose: bool) -> Self {
        let config = Self {
            enabled_trace_events: enabled_log_events.iter().cloned().collect(),
            verbose,
        };

        let layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .without_time()
            .with_target(false)
            .with_filter(config.compose_filter());

        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            // Something went wrong; proceed on anyway but complain audibly.
            eprintln!("warning: failed to initialize tracing.");
        }

        config
    }

    fn compose_filter(&self) -> Targets {
        let default_level = if self.verbose {
            tracing_subscriber::filter::LevelFilter::DEBUG
        } else {
            tracing_subscriber::filter::LevelFilter::INFO
        };

        let mut filter = Targets::new().with_default(default_level);

        for event in &self.enabled_trace_events {
            let target = match event {
                TraceEvent::Process => trace_categories::PROCESS,
                TraceEvent::Pipe => trace_categories::PIPE,
                TraceEvent::Stop => trace_categories::STOP,
            };

            filter = filter.with_target(target, tracing::Level::DEBUG);
        }

        filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    #[test]
    fn enabled_categories_log_debug() {
        let config = TraceEventConfig {
            enabled_trace_events: [TraceEvent::Stop].into_iter().collect(),
            verbose: false,
        };

        let filter = config.compose_filter();
        assert!(filter.would_enable(trace_categories::STOP, &Level::DEBUG));
        assert!(!filter.would_enable(trace_categories::PIPE, &Level::DEBUG));
        assert!(filter.would_enable(trace_categories::PIPE, &Level::INFO));
    }

    #[test]
    fn verbose_raises_default_level() {
        let config = TraceEventConfig {
            verbose: true,
            ..TraceEventConfig::default()
        };
        assert!(config.compose_filter().would_enable("anything", &Level::DEBUG));
    }

    #[test]
    fn display_matches_value_names() {
        assert_eq!(TraceEvent::Process.to_string(), "process");
        assert_eq!(TraceEvent::Pipe.to_string(), "pipe");
        assert_eq!(TraceEvent::Stop.to_string(), "stop");
    }
}
