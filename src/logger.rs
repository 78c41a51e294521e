//! The scoped logger facade: levelled printing, scope derivation, and the
//! coloured margin prefix shared with the output transformer.

use std::fmt::Display;
use std::io::{self, Write};
use std::sync::Arc;

use crossterm::tty::IsTty;

use crate::config::LogConfig;
use crate::geometry::GeometrySource;
use crate::level::LogLevel;
use crate::transform::LogWriter;

const RESET: &str = "\x1b[0m";

/// 256-colour codes considered legible on both dark and light backgrounds.
const SCOPE_PALETTE: &[u8] = &[
    33, 39, 45, 69, 75, 81, 111, 117, 141, 147, 177, 183, 203, 208, 209, 214, 220, 76, 112, 154,
];

/// Deterministic colour for a scope label (FNV-1a into the palette).
fn scope_color(scope: &str) -> String {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in scope.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x1_0000_0000_01b3);
    }
    let index = (hash % SCOPE_PALETTE.len() as u64) as usize;
    format!("\x1b[38;5;{}m", SCOPE_PALETTE[index])
}

/// A scoped, levelled logger.
///
/// Cheap to clone; children created with [`scope`](Logger::scope) share the
/// threshold and the geometry source. A single logger's write path is not
/// safe for concurrent use — give each concurrent task its own child.
#[derive(Clone)]
pub struct Logger {
    level: LogLevel,
    scope: String,
    geometry: Arc<GeometrySource>,
    colors: bool,
}

impl Logger {
    /// Root logger wired to the real terminal: initial geometry is queried
    /// from it, a SIGWINCH watcher keeps the geometry fresh, and colours are
    /// enabled iff stdout is a TTY.
    pub fn new(config: &LogConfig) -> Logger {
        let geometry = Arc::new(GeometrySource::new());
        geometry.sync_from_terminal();
        // Best-effort: without the watcher the startup size simply sticks.
        let _ = geometry.watch_resize();
        Logger {
            level: config.effective_level(),
            scope: String::new(),
            geometry,
            colors: io::stdout().is_tty(),
        }
    }

    /// Logger over an injected geometry source, for tests and embedders that
    /// manage the terminal themselves.
    pub fn with_geometry(
        config: &LogConfig,
        geometry: Arc<GeometrySource>,
        colors: bool,
    ) -> Logger {
        Logger {
            level: config.effective_level(),
            scope: String::new(),
            geometry,
            colors,
        }
    }

    /// A child logger with the given scope, sharing threshold and geometry.
    pub fn scope(&self, scope: impl Into<String>) -> Logger {
        Logger {
            level: self.level,
            scope: scope.into(),
            geometry: Arc::clone(&self.geometry),
            colors: self.colors,
        }
    }

    /// The shared geometry source.
    pub fn geometry(&self) -> &Arc<GeometrySource> {
        &self.geometry
    }

    /// Whether a message at `level` passes the threshold.
    pub fn enabled(&self, level: LogLevel) -> bool {
        self.level <= level
    }

    /// The scope label fitted to the margin: truncated with a leading
    /// ellipsis, or right-padded with spaces.
    fn padded_scope(&self) -> String {
        let margin = self.geometry.load().margin as usize;
        let count = self.scope.chars().count();
        if count > margin {
            let tail: String = self
                .scope
                .chars()
                .skip(count - margin.saturating_sub(1))
                .collect();
            format!("…{tail}")
        } else {
            format!("{}{}", self.scope, " ".repeat(margin - count))
        }
    }

    /// The full line prefix for `level`: coloured scope label, separator,
    /// then the level's colour. Empty below the threshold.
    pub(crate) fn prefix(&self, level: LogLevel) -> String {
        if !self.enabled(level) {
            return String::new();
        }
        let scope = self.padded_scope();
        let mut prefix = String::new();
        if self.colors {
            prefix.push_str(&scope_color(&self.scope));
            prefix.push_str(&scope);
            prefix.push_str(RESET);
            prefix.push_str("| ");
            prefix.push_str(level.color());
        } else {
            prefix.push_str(&scope);
            prefix.push_str("| ");
        }
        prefix
    }

    fn log(&self, level: LogLevel, msg: &str) {
        if !self.enabled(level) {
            return;
        }
        let mut out = io::stdout().lock();
        let _ = write!(out, "{}{}", self.prefix(level), msg);
        if self.colors {
            let _ = write!(out, "{RESET}");
        }
        let _ = writeln!(out);
        let _ = out.flush();
    }

    pub fn trace(&self, msg: impl Display) {
        self.log(LogLevel::Trace, &msg.to_string());
    }

    pub fn debug(&self, msg: impl Display) {
        self.log(LogLevel::Debug, &msg.to_string());
    }

    pub fn info(&self, msg: impl Display) {
        self.log(LogLevel::Info, &msg.to_string());
    }

    pub fn notice(&self, msg: impl Display) {
        self.log(LogLevel::Notice, &msg.to_string());
    }

    pub fn warn(&self, msg: impl Display) {
        self.log(LogLevel::Warn, &msg.to_string());
    }

    pub fn error(&self, msg: impl Display) {
        self.log(LogLevel::Error, &msg.to_string());
    }

    /// A margin-aware writer to stdout at the given level. Callers must
    /// close (or drop) it before writing to stdout through other means.
    pub fn writer_at(&self, level: LogLevel) -> LogWriter {
        self.writer_to(level, Box::new(io::stdout()))
    }

    /// As [`writer_at`](Logger::writer_at), but to an arbitrary sink.
    pub fn writer_to(&self, level: LogLevel, sink: Box<dyn Write + Send>) -> LogWriter {
        LogWriter::spawn(self.clone(), level, sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::TermGeometry;

    fn source_with_margin(margin: u16) -> Arc<GeometrySource> {
        let source = Arc::new(GeometrySource::new());
        source.store(TermGeometry {
            margin,
            width: 80,
            height: 25,
        });
        source
    }

    fn plain_logger(scope: &str, margin: u16) -> Logger {
        Logger::with_geometry(&LogConfig::default(), source_with_margin(margin), false)
            .scope(scope)
    }

    #[test]
    fn test_prefix_pads_short_scope() {
        let logger = plain_logger("x", 4);
        assert_eq!(logger.prefix(LogLevel::Info), "x   | ");
    }

    #[test]
    fn test_prefix_truncates_long_scope_with_ellipsis() {
        let logger = plain_logger("src/deeply/nested.rs", 8);
        // Keeps the last margin-1 characters behind the ellipsis.
        assert_eq!(logger.prefix(LogLevel::Info), "…sted.rs| ");
    }

    #[test]
    fn test_prefix_empty_below_threshold() {
        let config = LogConfig {
            level: LogLevel::Error,
            ..LogConfig::default()
        };
        let logger =
            Logger::with_geometry(&config, source_with_margin(4), false).scope("x");
        assert_eq!(logger.prefix(LogLevel::Info), "");
        assert!(!logger.enabled(LogLevel::Info));
        assert!(logger.enabled(LogLevel::Error));
    }

    #[test]
    fn test_prefix_tracks_margin_changes() {
        let source = source_with_margin(4);
        let logger =
            Logger::with_geometry(&LogConfig::default(), Arc::clone(&source), false).scope("x");
        assert_eq!(logger.prefix(LogLevel::Info), "x   | ");
        source.store(TermGeometry {
            margin: 6,
            width: 80,
            height: 25,
        });
        assert_eq!(logger.prefix(LogLevel::Info), "x     | ");
    }

    #[test]
    fn test_coloured_prefix_shape() {
        let logger =
            Logger::with_geometry(&LogConfig::default(), source_with_margin(4), true).scope("x");
        let prefix = logger.prefix(LogLevel::Notice);
        assert!(prefix.starts_with("\x1b[38;5;"));
        assert!(prefix.contains("x   \x1b[0m| "));
        assert!(prefix.ends_with("\x1b[32m"));
    }

    #[test]
    fn test_scope_color_is_deterministic() {
        assert_eq!(scope_color("build"), scope_color("build"));
        assert!(scope_color("build").starts_with("\x1b[38;5;"));
    }

    #[test]
    fn test_child_shares_geometry() {
        let logger = plain_logger("parent", 16);
        let child = logger.scope("child");
        assert!(Arc::ptr_eq(logger.geometry(), child.geometry()));
        assert_eq!(child.prefix(LogLevel::Info), "child           | ");
    }
}
