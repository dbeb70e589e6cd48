//! Wire format and chat-line types.
//!
//! The wire format is as plain as it gets: one UTF-8 line per message, terminated by `\n`.
//!
//! <text bytes, no \n or \r><\n>
//!
//! A trailing `\r` is tolerated on input so peers that write CRLF still work. The literal line
//! `exit` (any ASCII case) is the sentinel: it travels over the wire like any other line but both
//! ends treat it as "end the session" rather than as chat content.

use std::{cmp, fmt, io};

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Local};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ChatError;

/// The reserved line that ends a session.
pub const SENTINEL: &str = "exit";

/// Upper bound on a single line, excluding the terminator. Keeps a peer that never sends `\n`
/// from growing the read buffer forever.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 8 * 1024;

/// Returns true if `line` is the sentinel. Matching is exact apart from ASCII case.
pub fn is_sentinel(line: &str) -> bool {
    line.eq_ignore_ascii_case(SENTINEL)
}

/// Checks that `line` can go on the wire as exactly one line.
pub fn validate_line(line: &str, max_length: usize) -> Result<(), ChatError> {
    if line.contains(['\n', '\r']) {
        return Err(ChatError::InvalidLine(
            "line contains an embedded line break".to_string(),
        ));
    }
    if line.len() > max_length {
        return Err(ChatError::InvalidLine(format!(
            "line is {} bytes, the limit is {}",
            line.len(),
            max_length
        )));
    }
    Ok(())
}

/// Which end of the connection a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Bound a port and accepted the connection.
    Listener,
    /// Dialed the listener.
    Connector,
}

impl Role {
    /// The role on the other end of the connection.
    pub fn peer(self) -> Role {
        match self {
            Role::Listener => Role::Connector,
            Role::Connector => Role::Listener,
        }
    }

    /// Name shown to the operator and written to transcripts.
    pub fn label(self) -> &'static str {
        match self {
            Role::Listener => "Server",
            Role::Connector => "Client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One recorded chat line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
    pub at: DateTime<Local>,
}

impl TranscriptEntry {
    pub fn new(role: Role, text: impl Into<String>) -> TranscriptEntry {
        TranscriptEntry {
            role,
            text: text.into(),
            at: Local::now(),
        }
    }
}

/// Splits a byte stream on `\n` and joins lines back with it.
#[derive(Debug, Clone)]
pub struct LineCodec {
    /// Where to resume the newline search, so a slow trickle of bytes is scanned once.
    next_index: usize,
    max_length: usize,
}

impl LineCodec {
    pub fn new(max_length: usize) -> LineCodec {
        LineCodec {
            next_index: 0,
            max_length,
        }
    }
}

impl Default for LineCodec {
    fn default() -> LineCodec {
        LineCodec::new(DEFAULT_MAX_LINE_LENGTH)
    }
}

fn line_too_long(max_length: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("peer sent a line longer than {} bytes", max_length),
    )
}

impl LineCodec {
    /// Drops an optional trailing `\r`, then holds what is left to the length limit.
    fn finish_line(&self, raw: &[u8]) -> Result<String, io::Error> {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if raw.len() > self.max_length {
            return Err(line_too_long(self.max_length));
        }
        Ok(String::from_utf8_lossy(raw).into_owned())
    }
}

/// Take in raw bytes from the peer, hand back complete lines without their terminator.
impl Decoder for LineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        // A line of exactly max_length bytes may still carry "\r\n" after it.
        let read_to = cmp::min(self.max_length.saturating_add(2), buf.len());
        let start = cmp::min(self.next_index, read_to);

        match buf[start..read_to].iter().position(|byte| *byte == b'\n') {
            Some(offset) => {
                let newline = start + offset;
                self.next_index = 0;
                let line = buf.split_to(newline + 1);
                self.finish_line(&line[..newline]).map(Some)
            }
            None if buf.len() > self.max_length.saturating_add(1) => {
                Err(line_too_long(self.max_length))
            }
            None => {
                self.next_index = read_to;
                Ok(None)
            }
        }
    }

    /// The last line before a clean close may lack its terminator; deliver it anyway.
    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        self.next_index = 0;
        let rest = buf.split_to(buf.len());
        self.finish_line(&rest).map(Some)
    }
}

/// Takes one line of text, outputs it with a `\n` terminator.
impl<T: AsRef<str>> Encoder<T> for LineCodec {
    type Error = io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), io::Error> {
        let line = item.as_ref();
        validate_line(line, self.max_length)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err.to_string()))?;

        dst.reserve(line.len() + 1);
        dst.put(line.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}
