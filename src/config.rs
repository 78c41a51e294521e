//! Logging configuration: level threshold and convenience force-flags.

use clap::Args;

use crate::level::LogLevel;

/// Logging options, embeddable into a clap CLI with `#[command(flatten)]`.
#[derive(Debug, Clone, Args)]
pub struct LogConfig {
    /// Log level threshold.
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    pub level: LogLevel,

    /// Force debug logging.
    #[arg(long, conflicts_with = "trace")]
    pub debug: bool,

    /// Force trace logging.
    #[arg(long, conflicts_with = "debug")]
    pub trace: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            debug: false,
            trace: false,
        }
    }
}

impl LogConfig {
    /// The threshold after applying the force-flags: `--trace` wins over
    /// `--debug`, which wins over `--level`.
    pub fn effective_level(&self) -> LogLevel {
        if self.trace {
            LogLevel::Trace
        } else if self.debug {
            LogLevel::Debug
        } else {
            self.level
        }
    }
}
