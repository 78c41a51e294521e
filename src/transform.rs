//! Margin-aware rewriting of subprocess output.
//!
//! The transformer consumes [`Segment`]s, shifts cursor-horizontal-absolute
//! sequences right by the margin, wraps prefix-destroying erase-in-line
//! sequences so the scope label survives, and redraws the coloured prefix at
//! the start of every line. [`LogWriter`] runs a transformer on a worker
//! thread behind an `io::Write` front; closing the writer drains the worker.

use std::io::{self, Read, Write};
use std::sync::mpsc::{Receiver, Sender};
use std::thread;

use crate::csi::{ControlSeq, Segment, SegmentReader};
use crate::level::LogLevel;
use crate::logger::Logger;

pub(crate) struct Transformer<W: Write> {
    logger: Logger,
    level: LogLevel,
    out: W,
    draw_prefix: bool,
    pending: Vec<u8>,
}

impl<W: Write> Transformer<W> {
    pub(crate) fn new(logger: Logger, level: LogLevel, out: W) -> Self {
        Self {
            logger,
            level,
            out,
            draw_prefix: true,
            pending: Vec::new(),
        }
    }

    /// Transform everything `input` yields. Clean end-of-stream flushes any
    /// buffered newlines and returns quietly; other read faults flush, log a
    /// warning, and stop.
    pub(crate) fn run<R: Read>(&mut self, input: R) {
        let mut segments = SegmentReader::new(input);
        loop {
            match segments.next_segment() {
                Ok(Some(segment)) => {
                    if self.handle(&segment).is_err() {
                        return;
                    }
                }
                Ok(None) => {
                    let _ = self.finish();
                    return;
                }
                Err(e) => {
                    let _ = self.finish();
                    self.logger
                        .warn(format!("error reading escape sequence: {e}"));
                    return;
                }
            }
        }
    }

    fn handle(&mut self, segment: &Segment) -> io::Result<()> {
        match segment {
            Segment::Text(bytes) => self.emit_text(bytes),
            Segment::Control(cs) => {
                let rewritten = self.rewrite(cs);
                self.emit_text(&rewritten)
            }
        }
    }

    /// Rewrite the sequences that interact with the margin; everything else
    /// passes through as its original bytes. Only the single-parameter forms
    /// of G and K are defined here.
    fn rewrite(&self, cs: &ControlSeq) -> Vec<u8> {
        if cs.params.len() != 1 {
            return cs.raw.clone();
        }
        match cs.final_byte {
            // Cursor horizontal absolute: shift right past the margin and
            // the two separator columns.
            b'G' => {
                let margin = self.logger.geometry().load().margin;
                let col = cs.params[0]
                    .saturating_add(u32::from(margin))
                    .saturating_add(2);
                format!("\x1b[{col}G").into_bytes()
            }
            // Erase to start of line / entire line would wipe the prefix:
            // save the cursor, erase, redraw the prefix at column 1, restore.
            b'K' if cs.params[0] == 1 || cs.params[0] == 2 => {
                let mut text = b"\x1b[s".to_vec();
                text.extend_from_slice(&cs.raw);
                text.extend_from_slice(b"\x1b[1G");
                text.extend_from_slice(self.logger.prefix(self.level).as_bytes());
                text.extend_from_slice(b"\x1b[u");
                text
            }
            _ => cs.raw.clone(),
        }
    }

    /// Write text a byte at a time, holding back `\r`/`\n` so the prefix for
    /// the next line is only drawn once its first visible byte arrives.
    fn emit_text(&mut self, bytes: &[u8]) -> io::Result<()> {
        for &byte in bytes {
            if byte == b'\r' || byte == b'\n' {
                self.pending.push(byte);
                continue;
            }
            if self.draw_prefix {
                self.out
                    .write_all(self.logger.prefix(self.level).as_bytes())?;
                self.draw_prefix = false;
            }
            for i in 0..self.pending.len() {
                self.out.write_all(&self.pending[i..i + 1])?;
                self.out
                    .write_all(self.logger.prefix(self.level).as_bytes())?;
            }
            self.pending.clear();
            self.out.write_all(&[byte])?;
        }
        Ok(())
    }

    /// Flush held-back newlines at end of stream.
    fn finish(&mut self) -> io::Result<()> {
        let pending = std::mem::take(&mut self.pending);
        self.out.write_all(&pending)?;
        self.out.flush()
    }
}

/// A writer whose bytes are transformed on a worker thread before reaching
/// the terminal.
///
/// [`close`](LogWriter::close) (or drop) stops the worker and does not
/// return until every byte written beforehand has been transformed and
/// flushed, so callers can safely interleave other terminal output
/// afterwards. Not for concurrent use by multiple callers.
pub struct LogWriter {
    tx: Option<Sender<Vec<u8>>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl LogWriter {
    pub(crate) fn spawn(
        logger: Logger,
        level: LogLevel,
        sink: Box<dyn Write + Send>,
    ) -> LogWriter {
        let (tx, rx) = std::sync::mpsc::channel::<Vec<u8>>();
        let worker = thread::spawn(move || {
            let mut transformer = Transformer::new(logger, level, sink);
            transformer.run(ChannelReader {
                rx,
                chunk: Vec::new(),
                pos: 0,
            });
        });
        LogWriter {
            tx: Some(tx),
            worker: Some(worker),
        }
    }

    /// Stop accepting input and block until the worker has drained and
    /// flushed everything already written. Idempotent.
    pub fn close(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "writer closed"))?;
        tx.send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "transform worker stopped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        self.close();
    }
}

/// Blocking `Read` over the writer's channel; EOF once the sender is gone.
struct ChannelReader {
    rx: Receiver<Vec<u8>>,
    chunk: Vec<u8>,
    pos: usize,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.chunk.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.chunk = chunk;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.chunk.len() - self.pos);
        buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
pub(crate) use test_sink::SharedSink;


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogConfig;
    use crate::geometry::{GeometrySource, TermGeometry};
    use std::io::Cursor;
    use std::sync::Arc;

    fn test_logger(scope: &str, margin: u16, colors: bool) -> Logger {
        let source = Arc::new(GeometrySource::new());
        source.store(TermGeometry {
            margin,
            width: 80,
            height: 25,
        });
        Logger::with_geometry(&LogConfig::default(), source, colors).scope(scope)
    }

    fn transform(logger: &Logger, level: LogLevel, input: &[u8]) -> String {
        let sink = SharedSink::default();
        let mut transformer = Transformer::new(logger.clone(), level, sink.clone());
        transformer.run(Cursor::new(input.to_vec()));
        sink.as_string()
    }

    #[test]
    fn test_prefix_before_every_line() {
        let logger = test_logger("x", 4, false);
        let out = transform(&logger, LogLevel::Info, b"a\nb\nc");
        assert_eq!(out, "x   | a\nx   | b\nx   | c");
    }

    #[test]
    fn test_trailing_newline_flushed_without_prefix() {
        let logger = test_logger("x", 4, false);
        let out = transform(&logger, LogLevel::Info, b"a\n");
        assert_eq!(out, "x   | a\n");
    }

    #[test]
    fn test_crlf_buffered_together() {
        let logger = test_logger("x", 4, false);
        let out = transform(&logger, LogLevel::Info, b"a\r\nb");
        assert_eq!(out, "x   | a\rx   | \nx   | b");
    }

    #[test]
    fn test_cha_shifted_by_margin_plus_two() {
        for margin in [4u16, 10, 16, 40] {
            let logger = test_logger("x", margin, false);
            let out = transform(&logger, LogLevel::Info, b"\x1b[5G");
            let expected_col = 5 + u32::from(margin) + 2;
            assert!(
                out.ends_with(&format!("\x1b[{expected_col}G")),
                "margin {margin}: got {out:?}"
            );
        }
    }

    #[test]
    fn test_cha_with_huge_column_saturates() {
        // u32::MAX is a well-formed parameter; the shift must not overflow.
        let logger = test_logger("x", 10, false);
        let out = transform(&logger, LogLevel::Info, b"\x1b[4294967295G");
        assert_eq!(out, format!("x         | \x1b[{}G", u32::MAX));
    }

    #[test]
    fn test_cha_multi_parameter_passes_through() {
        let logger = test_logger("x", 4, false);
        let out = transform(&logger, LogLevel::Info, b"\x1b[5;6G");
        assert_eq!(out, "x   | \x1b[5;6G");
    }

    #[test]
    fn test_erase_line_wraps_prefix_redraw() {
        let logger = test_logger("x", 4, false);
        for param in [1u8, 2] {
            let input = format!("ab\x1b[{param}K");
            let out = transform(&logger, LogLevel::Info, input.as_bytes());
            assert_eq!(
                out,
                format!("x   | ab\x1b[s\x1b[{param}K\x1b[1Gx   | \x1b[u")
            );
        }
    }

    #[test]
    fn test_erase_to_end_of_line_passes_through() {
        let logger = test_logger("x", 4, false);
        let out = transform(&logger, LogLevel::Info, b"ab\x1b[0K");
        assert_eq!(out, "x   | ab\x1b[0K");
        // The parameterless form is equivalent to 0 and also untouched.
        let out = transform(&logger, LogLevel::Info, b"ab\x1b[K");
        assert_eq!(out, "x   | ab\x1b[K");
    }

    #[test]
    fn test_unrecognized_sequences_pass_through_verbatim() {
        let logger = test_logger("x", 4, false);
        let out = transform(&logger, LogLevel::Info, b"\x1b[31mred\x1b[0m");
        assert_eq!(out, "x   | \x1b[31mred\x1b[0m");
    }

    #[test]
    fn test_below_threshold_writes_bytes_without_prefix() {
        let source = Arc::new(GeometrySource::new());
        let config = LogConfig {
            level: LogLevel::Warn,
            ..LogConfig::default()
        };
        let logger = Logger::with_geometry(&config, source, false).scope("x");
        let out = transform(&logger, LogLevel::Info, b"a\nb");
        assert_eq!(out, "a\nb");
    }

    #[test]
    fn test_coloured_prefix_redrawn_after_newline() {
        let logger = test_logger("x", 4, true);
        let prefix = logger.prefix(LogLevel::Info);
        assert!(prefix.contains("\x1b[38;5;"));
        assert!(prefix.contains("\x1b[0m"));
        assert!(prefix.contains("| "));

        let sink = SharedSink::default();
        let mut writer =
            LogWriter::spawn(logger.clone(), LogLevel::Info, Box::new(sink.clone()));
        writer.write_all(b"a\n").expect("write");
        writer.write_all(b"b").expect("write");
        writer.close();
        assert_eq!(sink.as_string(), format!("{prefix}a\n{prefix}b"));
    }

    #[test]
    fn test_read_fault_flushes_pending_and_stops() {
        // A reader that yields one chunk, then fails with a non-EOF error.
        struct FaultyReader {
            chunk: Option<Vec<u8>>,
        }
        impl io::Read for FaultyReader {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                match self.chunk.take() {
                    Some(chunk) => {
                        buf[..chunk.len()].copy_from_slice(&chunk);
                        Ok(chunk.len())
                    }
                    None => Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied")),
                }
            }
        }

        let logger = test_logger("x", 4, false);
        let sink = SharedSink::default();
        let mut transformer = Transformer::new(logger, LogLevel::Info, sink.clone());
        transformer.run(FaultyReader {
            chunk: Some(b"a\n".to_vec()),
        });
        // Everything read before the fault is flushed, including the
        // held-back newline, and the worker stops cleanly.
        assert_eq!(sink.as_string(), "x   | a\n");
    }

    #[test]
    fn test_close_drains_all_written_bytes() {
        let logger = test_logger("x", 4, false);
        let sink = SharedSink::default();
        let mut writer = LogWriter::spawn(logger, LogLevel::Info, Box::new(sink.clone()));
        for i in 0..100 {
            writer
                .write_all(format!("line{i}\n").as_bytes())
                .expect("write");
        }
        writer.close();
        let out = sink.as_string();
        assert_eq!(out.matches("x   | ").count(), 100);
        assert!(out.ends_with("line99\n"));
    }

    #[test]
    fn test_double_close_is_idempotent() {
        let logger = test_logger("x", 4, false);
        let sink = SharedSink::default();
        let mut writer = LogWriter::spawn(logger, LogLevel::Info, Box::new(sink.clone()));
        writer.write_all(b"a").expect("write");
        writer.close();
        writer.close();
        assert_eq!(sink.as_string(), "x   | a");
    }

    #[test]
    fn test_write_after_close_errors() {
        let logger = test_logger("x", 4, false);
        let sink = SharedSink::default();
        let mut writer = LogWriter::spawn(logger, LogLevel::Info, Box::new(sink));
        writer.close();
        assert!(writer.write_all(b"late").is_err());
    }
}
