//! Line framing
//!
//! Turns a byte stream into `\n`-terminated text lines (with `\r` stripped)
//! and back into `\r\n`-terminated wire lines.

use std::io::{Error, ErrorKind};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

/// Wire line terminator
pub const LINE_TERMINATOR: &str = "\r\n";

/// Longest accepted line in bytes, excluding the `\n`
pub const MAX_LINE_LEN: usize = 8192;

/// Append the wire terminator to a line
pub fn frame(line: &str) -> String {
    let mut framed = String::with_capacity(line.len() + LINE_TERMINATOR.len());
    framed.push_str(line);
    framed.push_str(LINE_TERMINATOR);
    framed
}

/// Reads text lines from an async byte stream
#[derive(Debug)]
pub struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    max_len: usize,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_max_len(inner, MAX_LINE_LEN)
    }

    pub fn with_max_len(inner: R, max_len: usize) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::with_capacity(256),
            max_len,
        }
    }

    /// Read the next line without its terminator
    ///
    /// Returns `Ok(None)` at end of stream. A trailing line without a
    /// terminator is still returned. Invalid UTF-8 is replaced lossily.
    /// A line longer than the limit fails with `InvalidData`; the stream
    /// is then mid-line and should be dropped.
    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        self.buf.clear();
        let limit = self.max_len as u64 + 1;
        let n = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut self.buf)
            .await?;
        if n == 0 {
            return Ok(None);
        }

        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
        } else if self.buf.len() > self.max_len {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("line exceeds {} bytes", self.max_len),
            ));
        }
        if self.buf.last() == Some(&b'\r') {
            self.buf.pop();
        }

        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }
}
