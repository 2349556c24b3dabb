//! # Value Object
//!
//! Tagged union of the five storable kinds plus the last-visit stamp that
//! drives LRU-approximate eviction. Replacing a key with a different kind
//! drops the old payload before the new one is installed; the enum makes
//! that the only possible behaviour.

use crate::bytestr::ByteStr;
use crate::deque::ChunkedDeque;
use crate::rehash::{RehashMap, RehashSet};

/// Payload of one keyspace entry.
#[derive(Debug)]
pub enum Value {
    Int(i64),
    Str(ByteStr),
    List(ChunkedDeque),
    Hash(RehashMap),
    Set(RehashSet),
}

impl Value {
    /// Kind name as reported by the `type` command.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Hash(_) => "hash",
            Value::Set(_) => "set",
        }
    }

    /// Snapshot type tag for this kind.
    pub fn type_tag(&self) -> u8 {
        match self {
            Value::Int(_) => 1,
            Value::Str(_) => 2,
            Value::List(_) => 3,
            Value::Hash(_) => 4,
            Value::Set(_) => 5,
        }
    }
}

/// A stored value plus its bookkeeping.
#[derive(Debug)]
pub struct ValueObject {
    pub value: Value,
    /// Unix milliseconds of the last read or write.
    pub last_visit: u64,
}

impl ValueObject {
    pub fn new(value: Value, now_ms: u64) -> Self {
        ValueObject {
            value,
            last_visit: now_ms,
        }
    }

    /// Stamps the entry as just visited.
    #[inline]
    pub fn touch(&mut self, now_ms: u64) {
        self.last_visit = now_ms;
    }
}

/// Rewrites an `Int` payload as its decimal `Str` form in place.
///
/// `append` is the one operation that coerces across kinds; keeping the
/// promotion here lets it be tested in isolation.
pub fn coerce_to_string(value: &mut Value) {
    if let Value::Int(n) = value {
        let text = n.to_string();
        *value = Value::Str(ByteStr::from_bytes(text.as_bytes()));
    }
}
