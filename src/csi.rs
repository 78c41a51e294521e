//! Pull-based segmentation of a byte stream into text runs and CSI escape
//! sequences.
//!
//! The reader is a two-state machine (scanning text, scanning a control
//! sequence) with a bounded control buffer. Anything that does not parse as
//! a complete `ESC [ params final` sequence — truncated, oversized, or with
//! non-numeric parameters — degrades to a [`Segment::Text`] of the raw bytes
//! rather than an error.

use std::io::{self, Read};

const ESC: u8 = 0x1b;

/// Control sequences longer than this are assumed malformed and degrade to
/// text.
const MAX_CONTROL_LEN: usize = 64;

/// One parsed unit of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// A run of bytes with no recognized escape sequence.
    Text(Vec<u8>),
    /// A complete CSI sequence with numeric parameters.
    Control(ControlSeq),
}

/// A fully parsed `ESC [ params final` sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlSeq {
    /// The final byte selecting the sequence's meaning ('G', 'K', 'm', ...).
    pub final_byte: u8,
    /// `;`-separated numeric parameters; empty fields parse as 0.
    pub params: Vec<u32>,
    /// The original bytes, for verbatim passthrough.
    pub raw: Vec<u8>,
}

/// Segments an underlying byte stream on demand.
pub struct SegmentReader<R> {
    input: R,
    buf: Vec<u8>,
    pos: usize,
    done: bool,
}

impl<R: Read> SegmentReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            buf: Vec::new(),
            pos: 0,
            done: false,
        }
    }

    /// The next segment, or `Ok(None)` exactly once at end of stream.
    ///
    /// A closed pipe or clean EOF on the underlying reader is end of
    /// stream; any other read failure is returned as an error.
    pub fn next_segment(&mut self) -> io::Result<Option<Segment>> {
        if !self.ensure_data()? {
            return Ok(None);
        }
        if self.buf[self.pos] == ESC {
            self.read_escape()
        } else {
            Ok(Some(self.read_text(self.pos)))
        }
    }

    /// Refill the buffer if fully consumed. Returns false at end of stream.
    fn ensure_data(&mut self) -> io::Result<bool> {
        if self.done {
            return Ok(false);
        }
        while self.pos >= self.buf.len() {
            let mut chunk = [0u8; 4096];
            match self.input.read(&mut chunk) {
                Ok(0) => {
                    self.done = true;
                    return Ok(false);
                }
                Ok(n) => {
                    self.buf.clear();
                    self.buf.extend_from_slice(&chunk[..n]);
                    self.pos = 0;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if e.kind() == io::ErrorKind::BrokenPipe
                        || e.kind() == io::ErrorKind::UnexpectedEof =>
                {
                    self.done = true;
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Consume a text run starting at `start`, up to the next ESC or the end
    /// of the buffered data.
    fn read_text(&mut self, start: usize) -> Segment {
        while self.pos < self.buf.len() && self.buf[self.pos] != ESC {
            self.pos += 1;
        }
        Segment::Text(self.buf[start..self.pos].to_vec())
    }

    /// Parse at an ESC byte: either a CSI sequence, or text containing the
    /// unrecognized escape.
    fn read_escape(&mut self) -> io::Result<Option<Segment>> {
        self.pos += 1;
        if !self.ensure_data()? {
            // Stream ended right after ESC.
            return Ok(Some(Segment::Text(vec![ESC])));
        }
        match self.buf[self.pos] {
            b'[' => {
                self.pos += 1;
                self.read_control()
            }
            // Leave a following ESC in place so it can start its own parse.
            ESC => Ok(Some(Segment::Text(vec![ESC]))),
            other => {
                // Not a CSI introducer: fold ESC and what follows into text.
                self.pos += 1;
                let mut text = vec![ESC, other];
                if let Segment::Text(rest) = self.read_text(self.pos) {
                    text.extend_from_slice(&rest);
                }
                Ok(Some(Segment::Text(text)))
            }
        }
    }

    /// Buffer a CSI body until its final byte (0x40–0x7E), then parse the
    /// parameter list. Degrades to text when truncated, oversized, or
    /// non-numeric.
    fn read_control(&mut self) -> io::Result<Option<Segment>> {
        let mut raw = vec![ESC, b'['];
        loop {
            if raw.len() >= MAX_CONTROL_LEN {
                return Ok(Some(Segment::Text(raw)));
            }
            if !self.ensure_data()? {
                // No final byte before the stream ended.
                return Ok(Some(Segment::Text(raw)));
            }
            let byte = self.buf[self.pos];
            self.pos += 1;
            raw.push(byte);
            if (0x40..=0x7e).contains(&byte) {
                let body = &raw[2..raw.len() - 1];
                return Ok(Some(match parse_params(body) {
                    Some(params) => Segment::Control(ControlSeq {
                        final_byte: byte,
                        params,
                        raw,
                    }),
                    None => Segment::Text(raw),
                }));
            }
        }
    }
}

/// Parse a `;`-separated list of decimal parameters. Empty fields default
/// to 0; an empty body yields no parameters. Returns `None` on any
/// non-numeric byte (private markers, subparameters, intermediates).
fn parse_params(body: &[u8]) -> Option<Vec<u32>> {
    if body.is_empty() {
        return Some(Vec::new());
    }
    let mut params = Vec::new();
    for field in body.split(|&b| b == b';') {
        if field.is_empty() {
            params.push(0);
            continue;
        }
        if !field.iter().all(u8::is_ascii_digit) {
            return None;
        }
        let text = std::str::from_utf8(field).ok()?;
        params.push(text.parse().ok()?);
    }
    Some(params)
}
