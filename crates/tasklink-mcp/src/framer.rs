//! Newline-delimited JSON framing over a pair of byte streams.
//!
//! One JSON document per line, `\n` terminated. The write side flushes after
//! every line. The read side yields raw lines and leaves parsing to the
//! caller, so a corrupt line never poisons the stream.

use crate::error::McpError;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Maximum accepted inbound line length: 4 MiB.
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// A line read from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Line(String),
    /// The line exceeded [`MAX_LINE_BYTES`] and was discarded.
    Oversized(usize),
}

/// Reads newline-terminated lines from an async byte stream.
///
/// At most [`MAX_LINE_BYTES`] of a line are ever buffered. Reads are
/// resumable, so a `read_line` future dropped mid-line loses nothing.
pub struct LineReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
    /// Bytes of an oversized line still to be skipped up to its newline.
    discarding: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
            buf: Vec::new(),
            discarding: false,
        }
    }

    /// Read the next line, without its terminator.
    ///
    /// Returns `Ok(None)` at end of stream. A final line without a trailing
    /// newline is still returned. Invalid UTF-8 is replaced rather than
    /// rejected. A line longer than [`MAX_LINE_BYTES`] is reported as
    /// [`Frame::Oversized`] as soon as the limit is crossed; the rest of it
    /// is skipped by the next call.
    pub async fn read_line(&mut self) -> std::io::Result<Option<Frame>> {
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                self.discarding = false;
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(self.take_line()));
            }

            let newline = available.iter().position(|b| *b == b'\n');
            let chunk = newline.map_or(available.len(), |i| i + 1);

            if self.discarding {
                self.inner.consume(chunk);
                if newline.is_some() {
                    self.discarding = false;
                }
                continue;
            }

            let content = newline.unwrap_or(chunk);
            if self.buf.len() + content > MAX_LINE_BYTES {
                let len = self.buf.len() + chunk;
                self.inner.consume(chunk);
                self.buf = Vec::new();
                self.discarding = newline.is_none();
                return Ok(Some(Frame::Oversized(len)));
            }

            self.buf.extend_from_slice(&available[..chunk]);
            self.inner.consume(chunk);
            if newline.is_some() {
                return Ok(Some(self.take_line()));
            }
        }
    }

    fn take_line(&mut self) -> Frame {
        while matches!(self.buf.last(), Some(b'\n' | b'\r')) {
            self.buf.pop();
        }
        let line = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        Frame::Line(line)
    }
}

/// Writes one JSON document per line to an async byte stream.
pub struct LineWriter<W> {
    inner: W,
    /// Set while a line is being written. Still set afterwards means the
    /// write was abandoned and the stream may end mid-line.
    in_flight: bool,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: writer,
            in_flight: false,
        }
    }

    /// Serialize `doc` compactly, append `\n`, write and flush.
    ///
    /// Fails with [`std::io::ErrorKind::BrokenPipe`] once an earlier write
    /// was dropped before completing, since anything written after a
    /// partial line would be corrupt.
    pub async fn write_line<T: Serialize>(&mut self, doc: &T) -> Result<(), McpError> {
        if self.in_flight {
            return Err(McpError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "an earlier write was interrupted mid-line",
            )));
        }
        // Compact serde_json output escapes control characters, so the
        // document cannot contain a raw newline.
        let mut bytes = serde_json::to_vec(doc)?;
        bytes.push(b'\n');
        self.in_flight = true;
        self.inner.write_all(&bytes).await?;
        self.inner.flush().await?;
        self.in_flight = false;
        Ok(())
    }

    /// Whether an abandoned write left the stream unusable.
    pub fn is_broken(&self) -> bool {
        self.in_flight
    }

    /// Flush and close the underlying stream.
    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        self.inner.shutdown().await
    }
}
