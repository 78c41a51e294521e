//! Scoped, levelled terminal logging where each scope is uniquely coloured.
//!
//! Subprocess output can be redirected into a scope through a PTY; the most
//! common margin-sensitive CSI escape sequences (cursor horizontal absolute,
//! erase in line) are rewritten on the fly so that interactive programs —
//! progress bars, spinners — render correctly next to the coloured prefix.
//!
//! A single [`Logger`] write path does not support concurrent use; derive
//! independent child loggers with [`Logger::scope`] instead.

mod config;
mod csi;
mod error;
mod exec;
mod geometry;
mod level;
mod logger;
mod transform;

// Configuration
pub use config::LogConfig;

// Levels
pub use level::LogLevel;

// Errors
pub use error::{Error, Result};

// Terminal geometry broadcasting
pub use geometry::{GeometrySource, Subscription, TermGeometry};

// Escape sequence segmentation
pub use csi::{ControlSeq, Segment, SegmentReader};

// Transformed writers
pub use transform::LogWriter;

// Main logger facade
pub use logger::Logger;

// Subprocess execution
pub use exec::ExecOptions;

// Re-export for convenience
pub use portable_pty::CommandBuilder;
