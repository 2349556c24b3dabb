//! # LiteKV TCP Server
//!
//! tokio accept loop, per-session tasks, and the pub/sub channel registry.
//! The storage engine is shared behind an `Arc`; handlers run its sync
//! operations directly and never hold a bucket lock across an await.

mod pubsub;
mod server;

pub use pubsub::PubSub;
pub use server::{handle_connection, run_timer_loop, serve, ServerState};
