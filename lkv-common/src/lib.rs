//! # LiteKV Shared Types
//!
//! Error type, RESP2 framing, config parsing, and clock helpers shared by
//! the storage core, the engine, and the server.

pub mod config;
pub mod error;
pub mod resp;
pub mod time;

pub use config::Config;
pub use error::{LkvError, LkvResult};
pub use resp::{Command, Reply, RespError, RespParser};
