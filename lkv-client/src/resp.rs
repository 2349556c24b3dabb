//! # RESP2 Encoding and Parsing (client side)
//!
//! Purpose: Encode commands and parse server replies without external
//! dependencies, keeping allocations under control.
//!
//! ## Design Principles
//! 1. **Buffer Reuse**: The caller owns the scratch line buffer.
//! 2. **Binary-Safe**: Bulk strings are raw bytes.
//! 3. **Fail Fast**: Invalid framing surfaces immediately.

use std::io::BufRead;

use crate::client::{ClientError, ClientResult};

/// One reply frame from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// `+OK` style responses.
    Simple(Vec<u8>),
    /// `-ERROR …` responses.
    Error(Vec<u8>),
    /// `:123` responses.
    Integer(i64),
    /// `$…` bulk strings; `None` is the nil reply.
    Bulk(Option<Vec<u8>>),
    /// `*…` arrays.
    Array(Vec<RespValue>),
}

/// Encodes one command as an array of bulk strings.
pub fn encode_command(args: &[&[u8]], out: &mut Vec<u8>) {
    out.push(b'*');
    out.extend_from_slice(args.len().to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
    for arg in args {
        out.push(b'$');
        out.extend_from_slice(arg.len().to_string().as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Reads one reply frame from the buffered reader.
pub fn read_reply<R: BufRead>(reader: &mut R, line: &mut Vec<u8>) -> ClientResult<RespValue> {
    read_line(reader, line)?;
    if line.is_empty() {
        return Err(ClientError::Protocol);
    }
    match line[0] {
        b'+' => Ok(RespValue::Simple(line[1..].to_vec())),
        b'-' => Ok(RespValue::Error(line[1..].to_vec())),
        b':' => Ok(RespValue::Integer(parse_i64(&line[1..])?)),
        b'$' => read_bulk(reader, parse_i64(&line[1..])?),
        b'*' => read_array(reader, parse_i64(&line[1..])?, line),
        _ => Err(ClientError::Protocol),
    }
}

fn read_bulk<R: BufRead>(reader: &mut R, len: i64) -> ClientResult<RespValue> {
    if len < 0 {
        return Ok(RespValue::Bulk(None));
    }
    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data)?;
    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf)?;
    if crlf != [b'\r', b'\n'] {
        return Err(ClientError::Protocol);
    }
    Ok(RespValue::Bulk(Some(data)))
}

fn read_array<R: BufRead>(
    reader: &mut R,
    len: i64,
    line: &mut Vec<u8>,
) -> ClientResult<RespValue> {
    if len <= 0 {
        return Ok(RespValue::Array(Vec::new()));
    }
    let mut items = Vec::with_capacity(len as usize);
    for _ in 0..len {
        items.push(read_reply(reader, line)?);
    }
    Ok(RespValue::Array(items))
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 || buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(ClientError::Protocol);
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_i64(data: &[u8]) -> ClientResult<i64> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or(ClientError::Protocol)
}
