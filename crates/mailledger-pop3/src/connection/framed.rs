//! Framed I/O for the POP3 protocol.
//!
//! POP3 uses CRLF-terminated lines. Multi-line replies end with a line
//! holding a single `.`; any other line starting with `.` has one extra
//! `.` prepended on the wire (dot-stuffing). This module provides buffered
//! reading and writing of that framing, with per-operation timeouts.

use std::borrow::Cow;
use std::future::Future;
use std::io;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::command::Command;
use crate::parser::parse_status_line;
use crate::types::StatusLine;
use crate::{Error, Result};

/// Default buffer size for reading.
const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Upper bound on buffer space reserved from a server size hint.
const MAX_PREALLOCATION: usize = 16 * 1024 * 1024;

/// Framed connection for the POP3 protocol.
pub struct FramedStream<S> {
    reader: BufReader<S>,
    write_buffer: BytesMut,
    send_timeout: Option<Duration>,
    receive_timeout: Option<Duration>,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new framed stream without timeouts.
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_BUFFER_SIZE, stream),
            write_buffer: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE),
            send_timeout: None,
            receive_timeout: None,
        }
    }

    /// Sets the per-write and per-read timeouts.
    pub const fn set_timeouts(&mut self, send: Option<Duration>, receive: Option<Duration>) {
        self.send_timeout = send;
        self.receive_timeout = receive;
    }

    /// Reads one line including its terminator.
    ///
    /// Only `\n` delimits lines here; callers decide how strict to be about
    /// the preceding `\r`.
    async fn read_raw_line(&mut self) -> Result<Vec<u8>> {
        let mut line = Vec::new();

        loop {
            let buf = io_timeout(self.receive_timeout, "receive", self.reader.fill_buf()).await?;
            if buf.is_empty() {
                if line.is_empty() {
                    return Err(Error::Transport(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed",
                    )));
                }
                return Err(Error::ProtocolViolation(
                    "connection closed in the middle of a line".to_string(),
                ));
            }

            if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                line.extend_from_slice(&buf[..=pos]);
                self.reader.consume(pos + 1);
                return Ok(line);
            }

            let len = buf.len();
            line.extend_from_slice(buf);
            self.reader.consume(len);
        }
    }

    /// Reads and parses a single status line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] if the line is not terminated by
    /// CRLF or has no status indicator, and a transport or timeout error if
    /// reading fails.
    pub async fn read_status(&mut self) -> Result<StatusLine> {
        let raw = self.read_raw_line().await?;
        let Some(line) = raw.strip_suffix(b"\r\n") else {
            return Err(Error::ProtocolViolation(format!(
                "status line not terminated by CRLF: {:?}",
                String::from_utf8_lossy(&raw)
            )));
        };

        let status = parse_status_line(line)?;
        tracing::trace!(%status, "S:");
        Ok(status)
    }

    /// Reads a multi-line block up to the terminating `.` line.
    ///
    /// One leading `.` is removed from stuffed lines; the terminator is not
    /// part of the result. Lines come back CRLF-terminated. `size_hint` only
    /// sizes the buffer; the terminator decides where the block ends.
    ///
    /// # Errors
    ///
    /// Returns a transport, timeout or protocol error if the stream ends or
    /// stalls before the terminator.
    pub async fn read_block(&mut self, size_hint: Option<usize>) -> Result<Bytes> {
        let capacity = size_hint.map_or(DEFAULT_BUFFER_SIZE, |hint| {
            hint.saturating_add(hint / 32).min(MAX_PREALLOCATION)
        });
        let mut block = BytesMut::with_capacity(capacity);

        loop {
            let raw = self.read_raw_line().await?;
            let line = strip_line_ending(&raw);
            if line == b"." {
                break;
            }

            let line = line.strip_prefix(b".").unwrap_or(line);
            block.extend_from_slice(line);
            block.extend_from_slice(b"\r\n");
        }

        tracing::trace!(octets = block.len(), "S: <multi-line block>");
        Ok(block.freeze())
    }

    /// Writes a command line.
    ///
    /// # Errors
    ///
    /// Returns a transport or timeout error if writing fails.
    pub async fn write_command(&mut self, command: &Command) -> Result<()> {
        tracing::trace!(%command, "C:");

        self.write_buffer.clear();
        self.write_buffer.extend_from_slice(&command.serialize());

        let send_timeout = self.send_timeout;
        let stream = self.reader.get_mut();
        io_timeout(send_timeout, "send", stream.write_all(&self.write_buffer)).await?;
        io_timeout(send_timeout, "send", stream.flush()).await?;

        Ok(())
    }

    /// Gets a reference to the underlying stream.
    pub fn get_ref(&self) -> &S {
        self.reader.get_ref()
    }

    /// Gets a mutable reference to the underlying stream.
    pub fn get_mut(&mut self) -> &mut S {
        self.reader.get_mut()
    }

    /// Consumes the framed stream and returns the inner stream.
    ///
    /// Note: Any buffered data will be lost.
    pub fn into_inner(self) -> S {
        self.reader.into_inner()
    }
}

/// Runs one I/O operation under an optional timeout.
async fn io_timeout<T, F>(limit: Option<Duration>, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(Error::Timeout(format!("{what} timed out after {limit:?}"))),
        },
        None => Ok(fut.await?),
    }
}

/// Strips a trailing CRLF, or a bare LF.
fn strip_line_ending(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r\n")
        .or_else(|| line.strip_suffix(b"\n"))
        .unwrap_or(line)
}

/// Finds the position of CRLF in a buffer.
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Splits a decoded block into its non-empty lines.
pub(crate) fn block_lines(block: &[u8]) -> impl Iterator<Item = Cow<'_, str>> {
    block
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .filter(|line| !line.is_empty())
        .map(String::from_utf8_lossy)
}

/// Encodes a payload as a dot-stuffed multi-line block with terminator.
///
/// The payload is split on CRLF; a final line without CRLF is terminated.
///
/// # Example
///
/// ```
/// use mailledger_pop3::connection::stuff_block;
///
/// assert_eq!(stuff_block(b"a\r\n.\r\n"), b"a\r\n..\r\n.\r\n");
/// ```
#[must_use]
pub fn stuff_block(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 8);
    let mut rest = payload;

    while !rest.is_empty() {
        let (line, next) = match find_crlf(rest) {
            Some(pos) => (&rest[..pos], &rest[pos + 2..]),
            None => (rest, &rest[rest.len()..]),
        };
        if line.first() == Some(&b'.') {
            out.push(b'.');
        }
        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
        rest = next;
    }

    out.extend_from_slice(b".\r\n");
    out
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use std::io::Cursor;

    use proptest::prelude::*;

    use super::*;
    use crate::types::{Indicator, ResponseCode};

    #[test]
    fn test_find_crlf() {
        assert_eq!(find_crlf(b"hello\r\n"), Some(5));
        assert_eq!(find_crlf(b"\r\n"), Some(0));
        assert_eq!(find_crlf(b"no newline"), None);
        assert_eq!(find_crlf(b"just\n"), None);
    }

    #[test]
    fn test_stuff_block() {
        assert_eq!(stuff_block(b""), b".\r\n");
        assert_eq!(stuff_block(b"hello"), b"hello\r\n.\r\n");
        assert_eq!(
            stuff_block(b".hidden\r\n\r\n.\r\n"),
            b"..hidden\r\n\r\n..\r\n.\r\n"
        );
    }

    #[test]
    fn test_block_lines() {
        let lines: Vec<_> = block_lines(b"1 120\r\n\r\n2 200\r\n").collect();
        assert_eq!(lines, ["1 120", "2 200"]);
    }

    #[tokio::test]
    async fn test_read_status() {
        use tokio_test::io::Builder;

        let mock = Builder::new().read(b"+OK [SYS/TEMP] hi\r\n").build();
        let mut framed = FramedStream::new(mock);

        let status = framed.read_status().await.unwrap();
        assert_eq!(status.indicator, Indicator::Ok);
        assert_eq!(status.code, Some(ResponseCode::SysTemp));
        assert_eq!(status.text, "hi");
    }

    #[tokio::test]
    async fn test_read_status_split_across_reads() {
        use tokio_test::io::Builder;

        let mock = Builder::new().read(b"+OK PO").read(b"P3 ready\r").read(b"\n").build();
        let mut framed = FramedStream::new(mock);

        assert_eq!(framed.read_status().await.unwrap().text, "POP3 ready");
    }

    #[tokio::test]
    async fn test_read_status_rejects_bare_lf() {
        use tokio_test::io::Builder;

        let mock = Builder::new().read(b"+OK ready\n").build();
        let mut framed = FramedStream::new(mock);

        assert!(matches!(
            framed.read_status().await,
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_read_status_unterminated() {
        let mut framed = FramedStream::new(Cursor::new(b"+OK rea".to_vec()));
        assert!(matches!(
            framed.read_status().await,
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_read_status_eof() {
        let mut framed = FramedStream::new(Cursor::new(Vec::new()));
        assert!(matches!(framed.read_status().await, Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn test_read_block_destuffs() {
        use tokio_test::io::Builder;

        let mock = Builder::new()
            .read(b"Subject: hi\r\n\r\n..signature\r\n")
            .read(b"..\r\n.\r\n")
            .build();
        let mut framed = FramedStream::new(mock);

        let block = framed.read_block(None).await.unwrap();
        assert_eq!(&block[..], b"Subject: hi\r\n\r\n.signature\r\n.\r\n");
    }

    #[tokio::test]
    async fn test_read_block_size_hint_is_advisory() {
        let mut framed = FramedStream::new(Cursor::new(b"abc\r\n.\r\n+OK\r\n".to_vec()));

        let block = framed.read_block(Some(1_000_000)).await.unwrap();
        assert_eq!(&block[..], b"abc\r\n");
        assert!(framed.read_status().await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_read_block_eof_before_terminator() {
        let mut framed = FramedStream::new(Cursor::new(b"line\r\n".to_vec()));
        assert!(framed.read_block(None).await.is_err());
    }

    #[tokio::test]
    async fn test_write_command() {
        use tokio_test::io::Builder;

        let mock = Builder::new().write(b"USER bob\r\n").build();
        let mut framed = FramedStream::new(mock);

        framed
            .write_command(&Command::User("bob".to_string()))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_timeout() {
        let (client, _server) = tokio::io::duplex(64);
        let mut framed = FramedStream::new(client);
        framed.set_timeouts(None, Some(Duration::from_millis(50)));

        let err = framed.read_status().await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_dot_line_round_trip() {
        let payload = b"first\r\n.\r\nlast\r\n";
        let mut framed = FramedStream::new(Cursor::new(stuff_block(payload)));

        let block = framed.read_block(None).await.unwrap();
        assert_eq!(&block[..], payload);
    }

    proptest! {
        #[test]
        fn stuffed_blocks_decode_to_original(lines in proptest::collection::vec("[.a-z ]{0,8}", 0..16)) {
            let payload: Vec<u8> = lines
                .iter()
                .flat_map(|line| line.bytes().chain(*b"\r\n"))
                .collect();

            let wire = stuff_block(&payload);
            let decoded = tokio_test::block_on(async {
                FramedStream::new(Cursor::new(wire)).read_block(None).await
            })
            .unwrap();

            prop_assert_eq!(&decoded[..], &payload[..]);
        }
    }
}
