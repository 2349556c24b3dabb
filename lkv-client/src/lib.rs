//! # LiteKV Sync Client
//!
//! A small, blocking RESP2 client for tests, tools, and embedding. One
//! connection per client; callers that need concurrency open several.

mod client;
mod resp;

pub use client::{ClientError, ClientResult, ClientTtl, LkvClient};
pub use resp::RespValue;
