//! Logging flags and subscriber installation.

use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

/// Filter used when neither `--log-filter` nor `-v` is given.
pub const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid log filter {filter:?}: {source}")]
    InvalidFilter {
        filter: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("failed to install the global tracing subscriber: {0}")]
    Install(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Logs: message format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable, single line.
    #[default]
    Full,
    /// Human-readable, multi line.
    Pretty,
    /// Machine-parseable, one JSON object per line.
    Json,
    /// Terse single line.
    Compact,
}

/// Logs: destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogDestination {
    Stdout,
    /// Keeps stdout free for command output.
    #[default]
    Stderr,
}

/// CLI config for the logging related subset of options.
#[derive(Debug, Clone, clap::Parser)]
pub struct LoggingConfig {
    /// Logs: filter directive
    ///
    /// Configures log severity level filter, by target.
    ///
    /// Simplest options: error, warn, info, debug, trace
    ///
    /// Levels for different modules can be specified. For example
    /// `debug,kube=info` specifies debug logging for all modules except for
    /// the kube client which will only display info level logging.
    ///
    /// Overridden by `-v`.
    #[clap(long = "log-filter", env = "LOG_FILTER", action)]
    pub log_filter: Option<String>,

    /// Logs: filter short-hand
    ///
    /// Convenient way to set log severity level filter.
    /// Overrides `--log-filter`.
    ///
    /// -v   'info'
    ///
    /// -vv  'debug,hyper=info,kube=info'
    ///
    /// -vvv 'trace,hyper=info,kube=info'
    #[clap(short = 'v', long = "verbose", action = clap::ArgAction::Count, verbatim_doc_comment)]
    pub log_verbose_count: u8,

    #[clap(
        long = "log-format",
        env = "LOG_FORMAT",
        default_value_t = LogFormat::default(),
        value_enum,
        action
    )]
    pub log_format: LogFormat,

    #[clap(
        long = "log-destination",
        env = "LOG_DESTINATION",
        default_value_t = LogDestination::default(),
        value_enum,
        action
    )]
    pub log_destination: LogDestination,
}

impl LoggingConfig {
    /// The effective filter directive.
    pub fn filter_directive(&self) -> String {
        match self.log_verbose_count {
            0 => self
                .log_filter
                .clone()
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            1 => "info".to_string(),
            2 => "debug,hyper=info,kube=info".to_string(),
            _ => "trace,hyper=info,kube=info".to_string(),
        }
    }

    pub fn env_filter(&self) -> Result<EnvFilter> {
        let filter = self.filter_directive();
        EnvFilter::try_new(&filter).map_err(|source| Error::InvalidFilter { filter, source })
    }

    /// Install the global `tracing` subscriber.
    pub fn install_global_subscriber(&self) -> Result<()> {
        let filter = self.env_filter()?;
        let (writer, ansi) = match self.log_destination {
            LogDestination::Stdout => (
                BoxMakeWriter::new(std::io::stdout),
                std::io::stdout().is_terminal(),
            ),
            LogDestination::Stderr => (
                BoxMakeWriter::new(std::io::stderr),
                std::io::stderr().is_terminal(),
            ),
        };
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(ansi);
        let installed = match self.log_format {
            LogFormat::Full => builder.try_init(),
            LogFormat::Pretty => builder.pretty().try_init(),
            LogFormat::Json => builder.json().try_init(),
            LogFormat::Compact => builder.compact().try_init(),
        };
        installed.map_err(|e| Error::Install(e.to_string()))
    }
}
