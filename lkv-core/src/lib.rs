//! # LiteKV Storage Core
//!
//! In-memory containers and the sharded keyspace: the byte-string value,
//! the block-chunked deque used for lists, the incrementally-rehashing
//! map/set, the value object, the key pool with eviction, and the timer
//! scheduler behind TTLs.

pub mod bytestr;
pub mod deque;
pub mod rehash;
pub mod store;
pub mod timer;
pub mod value;

pub use bytestr::ByteStr;
pub use deque::ChunkedDeque;
pub use rehash::{RehashMap, RehashSet};
pub use store::{EvictionPolicy, KvStore, Overview, ScalarValue};
pub use timer::{TimerHolder, TtlTable};
pub use value::{Value, ValueObject};
