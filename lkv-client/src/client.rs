//! # Blocking Client
//!
//! One TCP connection, one command in flight. Typed helpers cover the
//! verbs integration tests exercise; `command` issues anything else.

use std::fmt;
use std::io::{BufReader, Write};
use std::net::TcpStream;
use std::time::Duration;

use crate::resp::{encode_command, read_reply, RespValue};

/// Result type for client calls.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client.
#[derive(Debug)]
pub enum ClientError {
    /// Network or IO failure while reading/writing.
    Io(std::io::Error),
    /// Reply framing violated the protocol.
    Protocol,
    /// Server answered with an error reply.
    Server { message: Vec<u8> },
    /// Reply kind did not match the issued command.
    UnexpectedResponse,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Io(err) => write!(f, "io error: {err}"),
            ClientError::Protocol => write!(f, "protocol error"),
            ClientError::Server { message } => {
                write!(f, "server error: {}", String::from_utf8_lossy(message))
            }
            ClientError::UnexpectedResponse => write!(f, "unexpected response"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Io(err)
    }
}

/// TTL state reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientTtl {
    /// Key absent.
    Missing,
    /// Key exists without an expiry.
    NoExpiry,
    /// Key expires after roughly this long.
    ExpiresIn(Duration),
}

/// Blocking connection to a LiteKV server.
pub struct LkvClient {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    out_buf: Vec<u8>,
}

impl LkvClient {
    /// Connects to `addr` (e.g. `127.0.0.1:9527`).
    pub fn connect(addr: &str) -> ClientResult<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(LkvClient {
            stream,
            reader,
            line_buf: Vec::new(),
            out_buf: Vec::new(),
        })
    }

    /// Issues one command and reads one reply frame.
    pub fn command(&mut self, args: &[&[u8]]) -> ClientResult<RespValue> {
        self.out_buf.clear();
        encode_command(args, &mut self.out_buf);
        self.stream.write_all(&self.out_buf)?;
        read_reply(&mut self.reader, &mut self.line_buf)
    }

    /// Reads one pushed frame (pub/sub messages) without sending anything.
    pub fn read_push(&mut self) -> ClientResult<RespValue> {
        read_reply(&mut self.reader, &mut self.line_buf)
    }

    pub fn ping(&mut self) -> ClientResult<Vec<u8>> {
        match self.command(&[b"ping"])? {
            RespValue::Simple(text) => Ok(text),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub fn set(&mut self, key: &[u8], value: &[u8]) -> ClientResult<()> {
        match self.command(&[b"set", key, value])? {
            RespValue::Simple(_) => Ok(()),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Returns `None` when the key is missing.
    pub fn get(&mut self, key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        match self.command(&[b"get", key])? {
            RespValue::Bulk(data) => Ok(data),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub fn del(&mut self, key: &[u8]) -> ClientResult<bool> {
        Ok(self.int_command(&[b"del", key])? > 0)
    }

    pub fn exists(&mut self, key: &[u8]) -> ClientResult<bool> {
        Ok(self.int_command(&[b"exists", key])? > 0)
    }

    pub fn incr_by(&mut self, key: &[u8], delta: u64) -> ClientResult<i64> {
        self.int_command(&[b"incrby", key, delta.to_string().as_bytes()])
    }

    pub fn type_of(&mut self, key: &[u8]) -> ClientResult<Vec<u8>> {
        match self.command(&[b"type", key])? {
            RespValue::Simple(name) => Ok(name),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub fn expire(&mut self, key: &[u8], seconds: i64) -> ClientResult<bool> {
        Ok(self.int_command(&[b"expire", key, seconds.to_string().as_bytes()])? == 1)
    }

    pub fn ttl(&mut self, key: &[u8]) -> ClientResult<ClientTtl> {
        match self.int_command(&[b"ttl", key])? {
            -2 => Ok(ClientTtl::Missing),
            -1 => Ok(ClientTtl::NoExpiry),
            secs if secs >= 0 => Ok(ClientTtl::ExpiresIn(Duration::from_secs(secs as u64))),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub fn rpush(&mut self, key: &[u8], values: &[&[u8]]) -> ClientResult<i64> {
        let mut args: Vec<&[u8]> = vec![b"rpush", key];
        args.extend_from_slice(values);
        self.int_command(&args)
    }

    pub fn lpop(&mut self, key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        match self.command(&[b"lpop", key])? {
            RespValue::Bulk(data) => Ok(data),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub fn lrange(&mut self, key: &[u8], begin: i64, end: i64) -> ClientResult<Vec<Vec<u8>>> {
        let begin = begin.to_string();
        let end = end.to_string();
        match self.command(&[b"lrange", key, begin.as_bytes(), end.as_bytes()])? {
            RespValue::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    RespValue::Bulk(Some(data)) => Ok(data),
                    _ => Err(ClientError::UnexpectedResponse),
                })
                .collect(),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub fn hset(&mut self, key: &[u8], pairs: &[(&[u8], &[u8])]) -> ClientResult<()> {
        let mut args: Vec<&[u8]> = vec![b"hset", key];
        for (field, value) in pairs {
            args.push(field);
            args.push(value);
        }
        match self.command(&args)? {
            RespValue::Simple(_) => Ok(()),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub fn hget(&mut self, key: &[u8], field: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        match self.command(&[b"hget", key, field])? {
            RespValue::Bulk(data) => Ok(data),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub fn sadd(&mut self, key: &[u8], members: &[&[u8]]) -> ClientResult<i64> {
        let mut args: Vec<&[u8]> = vec![b"sadd", key];
        args.extend_from_slice(members);
        self.int_command(&args)
    }

    pub fn scard(&mut self, key: &[u8]) -> ClientResult<i64> {
        self.int_command(&[b"scard", key])
    }

    fn int_command(&mut self, args: &[&[u8]]) -> ClientResult<i64> {
        match self.command(args)? {
            RespValue::Integer(value) => Ok(value),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }
}
