//! # RESP2 Framing
//!
//! Purpose: Parse framed requests incrementally from a byte buffer and
//! encode replies, without copying more than once per argument.
//!
//! ## Design Principles
//! 1. **Resumable Parsing**: A partial frame consumes nothing and parsing
//!    retries when more bytes arrive.
//! 2. **Binary-Safe**: Bulk strings are raw bytes; no UTF-8 assumption.
//! 3. **Fail Fast**: Malformed framing is a protocol error, not a retry.
//! 4. **Shared Path**: The same parser serves sockets and append-log replay.

use bytes::{Buf, BytesMut};

/// Errors produced while parsing request frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespError {
    /// Framing violated the protocol; the connection should be dropped.
    Protocol,
}

/// A parsed client command: `argv[0]` is the verb, the rest are operands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    pub argv: Vec<Vec<u8>>,
}

impl Command {
    /// Builds a command from owned arguments.
    pub fn new(argv: Vec<Vec<u8>>) -> Self {
        Command { argv }
    }

    /// Builds a command from string-ish arguments; test and tool helper.
    pub fn from_args<T: AsRef<[u8]>>(args: &[T]) -> Self {
        Command {
            argv: args.iter().map(|a| a.as_ref().to_vec()).collect(),
        }
    }

    /// Returns the lowercased verb, or an empty string for an empty frame.
    pub fn opcode(&self) -> Vec<u8> {
        self.argv
            .first()
            .map(|v| v.to_ascii_lowercase())
            .unwrap_or_default()
    }

    /// Returns the key argument when present.
    pub fn key(&self) -> Option<&[u8]> {
        self.argv.get(1).map(|v| v.as_slice())
    }

    /// Re-encodes the command in request framing; used for log records.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(b'*');
        push_decimal(out, self.argv.len() as i64);
        out.extend_from_slice(b"\r\n");
        for arg in &self.argv {
            out.push(b'$');
            push_decimal(out, arg.len() as i64);
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(arg);
            out.extend_from_slice(b"\r\n");
        }
    }

    /// Convenience wrapper returning a fresh encoding.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }
}

/// A reply frame produced by a command handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+text`
    Simple(&'static str),
    /// `-KIND message`
    Error(String),
    /// `:n`
    Integer(i64),
    /// `$len\r\ndata`
    Bulk(Vec<u8>),
    /// `$-1`
    Nil,
    /// `*n` followed by n frames
    Array(Vec<Reply>),
    /// Several top-level frames written back to back; used by the
    /// subscription verbs which answer one frame per channel.
    Multi(Vec<Reply>),
}

impl Reply {
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Reply::Simple(text) => {
                out.push(b'+');
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Error(message) => {
                out.push(b'-');
                out.extend_from_slice(message.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Integer(value) => {
                out.push(b':');
                push_decimal(out, *value);
                out.extend_from_slice(b"\r\n");
            }
            Reply::Bulk(data) => {
                out.push(b'$');
                push_decimal(out, data.len() as i64);
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(data);
                out.extend_from_slice(b"\r\n");
            }
            Reply::Nil => out.extend_from_slice(b"$-1\r\n"),
            Reply::Array(items) => {
                out.push(b'*');
                push_decimal(out, items.len() as i64);
                out.extend_from_slice(b"\r\n");
                for item in items {
                    item.encode_into(out);
                }
            }
            Reply::Multi(frames) => {
                for frame in frames {
                    frame.encode_into(out);
                }
            }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    /// Wraps raw bytes as a bulk reply.
    pub fn bulk<T: AsRef<[u8]>>(data: T) -> Reply {
        Reply::Bulk(data.as_ref().to_vec())
    }
}

/// Incremental parser for request frames (`*argc` then argc bulk strings).
///
/// The parser holds no state between calls: it either consumes one whole
/// command from the front of the buffer or leaves the buffer untouched.
#[derive(Debug, Default)]
pub struct RespParser;

impl RespParser {
    pub fn new() -> Self {
        RespParser
    }

    /// Attempts to parse one command from the front of `buf`.
    ///
    /// Returns `Ok(None)` when the buffer holds a prefix of a valid frame,
    /// `Err(RespError::Protocol)` when the bytes cannot become one.
    pub fn parse(&mut self, buf: &mut BytesMut) -> Result<Option<Command>, RespError> {
        let data = &buf[..];
        if data.is_empty() {
            return Ok(None);
        }
        if data[0] != b'*' {
            return Err(RespError::Protocol);
        }

        let header_end = match find_crlf(data, 1) {
            Some(idx) => idx,
            None => return Ok(None),
        };
        let argc = parse_decimal(&data[1..header_end]).ok_or(RespError::Protocol)?;
        if argc <= 0 {
            return Err(RespError::Protocol);
        }

        let mut pos = header_end + 2;
        let mut argv = Vec::with_capacity(argc as usize);
        for _ in 0..argc {
            if pos >= data.len() {
                return Ok(None);
            }
            if data[pos] != b'$' {
                return Err(RespError::Protocol);
            }
            let len_end = match find_crlf(data, pos + 1) {
                Some(idx) => idx,
                None => return Ok(None),
            };
            let arg_len = parse_decimal(&data[pos + 1..len_end]).ok_or(RespError::Protocol)?;
            if arg_len < 0 {
                return Err(RespError::Protocol);
            }
            let arg_len = arg_len as usize;
            let start = len_end + 2;
            if data.len() < start + arg_len + 2 {
                return Ok(None);
            }
            if &data[start + arg_len..start + arg_len + 2] != b"\r\n" {
                return Err(RespError::Protocol);
            }
            argv.push(data[start..start + arg_len].to_vec());
            pos = start + arg_len + 2;
        }

        buf.advance(pos);
        Ok(Some(Command { argv }))
    }
}

fn find_crlf(data: &[u8], from: usize) -> Option<usize> {
    let mut idx = from;
    while idx + 1 < data.len() {
        if data[idx] == b'\r' && data[idx + 1] == b'\n' {
            return Some(idx);
        }
        idx += 1;
    }
    None
}

fn parse_decimal(data: &[u8]) -> Option<i64> {
    if data.is_empty() {
        return None;
    }
    let (negative, digits) = match data[0] {
        b'-' => (true, &data[1..]),
        _ => (false, data),
    };
    if digits.is_empty() {
        return None;
    }
    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value.checked_mul(10)?.checked_add((b - b'0') as i64)?;
    }
    Some(if negative { -value } else { value })
}

fn push_decimal(out: &mut Vec<u8>, mut value: i64) {
    // Digits land in a stack buffer so reply packing never allocates here.
    if value < 0 {
        out.push(b'-');
        value = -value;
    }
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.push(buf[idx]);
    }
}
