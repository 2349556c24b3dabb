//! # Sharded Keyspace
//!
//! Purpose: Hold every key under one of 512 independently locked buckets
//! and expose the typed container operations the dispatcher calls.
//!
//! ## Design Principles
//! 1. **One Lock Per Operation**: Every single-key operation locks exactly
//!    its bucket for the duration of the mutation; multi-key commands work
//!    key by key.
//! 2. **Master Key Copy**: The bucket map owns the key bytes as `Arc<[u8]>`;
//!    the key pool holds clones of the same `Arc`, never separate copies.
//! 3. **Indexed Key Pool**: The pool keeps a position index next to the key
//!    vector so delete is swap-remove O(1) instead of a linear scan.
//! 4. **Lock Order**: bucket before pool, always; eviction samples the pool
//!    without holding any bucket lock.

use std::sync::Arc;

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::Mutex;
use rand::Rng;

use lkv_common::time::now_ms;
use lkv_common::{LkvError, LkvResult};

use crate::bytestr::ByteStr;
use crate::deque::ChunkedDeque;
use crate::rehash::{MapPut, RehashMap, RehashSet, SetAdd};
use crate::value::{coerce_to_string, Value, ValueObject};

/// Number of keyspace shards.
pub const BUCKET_COUNT: usize = 512;

/// Candidate group size for one LRU-approximate round.
const LRU_SAMPLE_GROUP: usize = 10;

/// Wall-clock budget of one LRU eviction call.
const LRU_EVICTION_TIME_LIMIT_MS: u64 = 25;

type BucketMap = HashMap<Arc<[u8]>, ValueObject, RandomState>;

/// One keyspace shard: a mutex plus its key → value map.
struct Bucket {
    map: Mutex<BucketMap>,
}

/// Eviction candidate source: every live key, in insertion order.
struct KeyPool {
    keys: Vec<Arc<[u8]>>,
    index: HashMap<Arc<[u8]>, usize, RandomState>,
}

impl KeyPool {
    fn new(hash_state: RandomState) -> Self {
        KeyPool {
            keys: Vec::new(),
            index: HashMap::with_hasher(hash_state),
        }
    }

    fn len(&self) -> usize {
        self.keys.len()
    }

    fn push(&mut self, key: Arc<[u8]>) {
        self.index.insert(Arc::clone(&key), self.keys.len());
        self.keys.push(key);
    }

    /// Swap-removes `key`; the displaced tail key gets its index patched.
    fn remove(&mut self, key: &[u8]) -> bool {
        let idx = match self.index.remove(key) {
            Some(idx) => idx,
            None => return false,
        };
        self.keys.swap_remove(idx);
        if idx < self.keys.len() {
            let moved = Arc::clone(&self.keys[idx]);
            self.index.insert(moved, idx);
        }
        true
    }

    fn sample(&self, rng: &mut impl Rng) -> Option<Arc<[u8]>> {
        if self.keys.is_empty() {
            return None;
        }
        let idx = rng.gen_range(0..self.keys.len());
        Some(Arc::clone(&self.keys[idx]))
    }
}

/// Which eviction strategy the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    Random,
    LruApprox,
}

/// Result of a scalar read: the stored integer or a copy of the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalarValue {
    Int(i64),
    Bytes(Vec<u8>),
}

impl ScalarValue {
    /// Formats the value as reply bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            ScalarValue::Int(n) => n.to_string().into_bytes(),
            ScalarValue::Bytes(b) => b,
        }
    }
}

/// Per-kind population counts for the `overview` command.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Overview {
    pub n_int: u64,
    pub n_str: u64,
    pub n_list: u64,
    pub n_list_elems: u64,
    pub n_hash: u64,
    pub n_hash_entries: u64,
    pub n_set: u64,
    pub n_set_members: u64,
}

/// The sharded key → value container.
pub struct KvStore {
    buckets: Vec<Bucket>,
    pool: Mutex<KeyPool>,
}

impl Default for KvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore {
    pub fn new() -> Self {
        let hash_state = RandomState::new();
        let mut buckets = Vec::with_capacity(BUCKET_COUNT);
        for _ in 0..BUCKET_COUNT {
            buckets.push(Bucket {
                map: Mutex::new(BucketMap::with_hasher(hash_state.clone())),
            });
        }
        KvStore {
            buckets,
            pool: Mutex::new(KeyPool::new(hash_state)),
        }
    }

    #[inline]
    fn bucket(&self, key: &[u8]) -> &Bucket {
        let idx = (crate::bytestr::hash33(key) % BUCKET_COUNT as u64) as usize;
        &self.buckets[idx]
    }

    /// Installs a fresh entry; caller holds the bucket lock.
    fn install(&self, map: &mut BucketMap, key: &[u8], value: Value) {
        let master: Arc<[u8]> = Arc::from(key);
        map.insert(Arc::clone(&master), ValueObject::new(value, now_ms()));
        self.pool.lock().push(master);
    }

    // ---- generic key operations -------------------------------------------

    /// Kind name of the stored value, if any.
    pub fn type_of(&self, key: &[u8]) -> Option<&'static str> {
        let map = self.bucket(key).map.lock();
        map.get(key).map(|obj| obj.value.type_name())
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        self.bucket(key).map.lock().contains_key(key)
    }

    /// Number of the given keys that exist.
    pub fn exists_count(&self, keys: &[Vec<u8>]) -> usize {
        keys.iter().filter(|key| self.exists(key)).count()
    }

    pub fn num_items(&self) -> usize {
        self.buckets.iter().map(|b| b.map.lock().len()).sum()
    }

    pub fn delete(&self, key: &[u8]) -> bool {
        let bucket = self.bucket(key);
        let mut map = bucket.map.lock();
        if map.remove(key).is_none() {
            return false;
        }
        self.pool.lock().remove(key);
        true
    }

    pub fn delete_many(&self, keys: &[Vec<u8>]) -> usize {
        keys.iter().filter(|key| self.delete(key)).count()
    }

    /// Last-visit stamp, for eviction candidate ranking.
    pub fn last_visit(&self, key: &[u8]) -> Option<u64> {
        self.bucket(key).map.lock().get(key).map(|obj| obj.last_visit)
    }

    /// Walks every entry, bucket by bucket. Used by snapshot save and the
    /// overview report; never called while a bucket lock is held.
    pub fn for_each_entry(&self, mut f: impl FnMut(&[u8], &ValueObject)) {
        for bucket in &self.buckets {
            let map = bucket.map.lock();
            for (key, obj) in map.iter() {
                f(key, obj);
            }
        }
    }

    pub fn overview(&self) -> Overview {
        let mut view = Overview::default();
        self.for_each_entry(|_, obj| match &obj.value {
            Value::Int(_) => view.n_int += 1,
            Value::Str(_) => view.n_str += 1,
            Value::List(list) => {
                view.n_list += 1;
                view.n_list_elems += list.len() as u64;
            }
            Value::Hash(map) => {
                view.n_hash += 1;
                view.n_hash_entries += map.len() as u64;
            }
            Value::Set(set) => {
                view.n_set += 1;
                view.n_set_members += set.len() as u64;
            }
        });
        view
    }

    // ---- int / string -----------------------------------------------------

    pub fn set_int(&self, key: &[u8], value: i64) {
        let bucket = self.bucket(key);
        let mut map = bucket.map.lock();
        match map.get_mut(key) {
            None => self.install(&mut map, key, Value::Int(value)),
            Some(obj) => {
                obj.value = Value::Int(value);
                obj.touch(now_ms());
            }
        }
    }

    pub fn set_str(&self, key: &[u8], value: &[u8]) {
        let bucket = self.bucket(key);
        let mut map = bucket.map.lock();
        match map.get_mut(key) {
            None => self.install(&mut map, key, Value::Str(ByteStr::from_bytes(value))),
            Some(obj) => {
                // Same kind keeps the allocation; any other kind is replaced.
                if let Value::Str(s) = &mut obj.value {
                    s.reset(value);
                } else {
                    obj.value = Value::Str(ByteStr::from_bytes(value));
                }
                obj.touch(now_ms());
            }
        }
    }

    /// Adds a non-negative `delta`; a missing key starts from zero.
    pub fn incr_by(&self, key: &[u8], delta: i64) -> LkvResult<i64> {
        let bucket = self.bucket(key);
        let mut map = bucket.map.lock();
        match map.get_mut(key) {
            None => {
                self.install(&mut map, key, Value::Int(delta));
                Ok(delta)
            }
            Some(obj) => match &mut obj.value {
                Value::Int(current) => {
                    if *current > i64::MAX - delta {
                        return Err(LkvError::Overflow);
                    }
                    *current += delta;
                    let answer = *current;
                    obj.touch(now_ms());
                    Ok(answer)
                }
                _ => Err(LkvError::WrongType),
            },
        }
    }

    /// Subtracts a non-negative `delta`; a missing key starts from zero.
    pub fn decr_by(&self, key: &[u8], delta: i64) -> LkvResult<i64> {
        let bucket = self.bucket(key);
        let mut map = bucket.map.lock();
        match map.get_mut(key) {
            None => {
                self.install(&mut map, key, Value::Int(-delta));
                Ok(-delta)
            }
            Some(obj) => match &mut obj.value {
                Value::Int(current) => {
                    if *current < i64::MIN + delta {
                        return Err(LkvError::Overflow);
                    }
                    *current -= delta;
                    let answer = *current;
                    obj.touch(now_ms());
                    Ok(answer)
                }
                _ => Err(LkvError::WrongType),
            },
        }
    }

    /// Reads an int or string value.
    pub fn get_scalar(&self, key: &[u8]) -> LkvResult<ScalarValue> {
        let bucket = self.bucket(key);
        let mut map = bucket.map.lock();
        let obj = map.get_mut(key).ok_or(LkvError::NotFound)?;
        let scalar = match &obj.value {
            Value::Int(n) => ScalarValue::Int(*n),
            Value::Str(s) => ScalarValue::Bytes(s.as_bytes().to_vec()),
            _ => return Err(LkvError::WrongType),
        };
        obj.touch(now_ms());
        Ok(scalar)
    }

    /// Content length of a string, or digit count of an int.
    pub fn strlen(&self, key: &[u8]) -> LkvResult<usize> {
        let bucket = self.bucket(key);
        let mut map = bucket.map.lock();
        let obj = map.get_mut(key).ok_or(LkvError::NotFound)?;
        let len = match &obj.value {
            Value::Int(n) => n.to_string().len(),
            Value::Str(s) => s.len(),
            _ => return Err(LkvError::WrongType),
        };
        obj.touch(now_ms());
        Ok(len)
    }

    /// Appends to a string; an int is first promoted to its decimal form.
    pub fn append(&self, key: &[u8], value: &[u8]) -> LkvResult<usize> {
        let bucket = self.bucket(key);
        let mut map = bucket.map.lock();
        let obj = map.get_mut(key).ok_or(LkvError::NotFound)?;
        match &obj.value {
            Value::Int(_) | Value::Str(_) => {}
            _ => return Err(LkvError::WrongType),
        }
        coerce_to_string(&mut obj.value);
        let new_len = match &mut obj.value {
            Value::Str(s) => {
                s.append(value);
                s.len()
            }
            _ => unreachable!("coerced to string above"),
        };
        obj.touch(now_ms());
        Ok(new_len)
    }

    // ---- list -------------------------------------------------------------

    /// Pushes values one by one at the chosen end, creating the list on
    /// first use. Returns the resulting length.
    pub fn list_push(&self, key: &[u8], values: &[Vec<u8>], left: bool) -> LkvResult<usize> {
        let bucket = self.bucket(key);
        let mut map = bucket.map.lock();
        if map.get(key).is_none() {
            self.install(&mut map, key, Value::List(ChunkedDeque::new()));
        }
        let obj = map.get_mut(key).expect("installed above");
        let list = match &mut obj.value {
            Value::List(list) => list,
            _ => return Err(LkvError::WrongType),
        };
        for value in values {
            if left {
                list.push_left(value);
            } else {
                list.push_right(value);
            }
        }
        let len = list.len();
        obj.touch(now_ms());
        Ok(len)
    }

    /// Pops one element; `Ok(None)` when the list is empty.
    pub fn list_pop(&self, key: &[u8], left: bool) -> LkvResult<Option<Vec<u8>>> {
        let bucket = self.bucket(key);
        let mut map = bucket.map.lock();
        let obj = map.get_mut(key).ok_or(LkvError::NotFound)?;
        let list = match &mut obj.value {
            Value::List(list) => list,
            _ => return Err(LkvError::WrongType),
        };
        let popped = if left { list.pop_left() } else { list.pop_right() };
        obj.touch(now_ms());
        Ok(popped.map(|s| s.as_bytes().to_vec()))
    }

    pub fn list_len(&self, key: &[u8]) -> LkvResult<usize> {
        let bucket = self.bucket(key);
        let mut map = bucket.map.lock();
        let obj = map.get_mut(key).ok_or(LkvError::NotFound)?;
        let len = match &obj.value {
            Value::List(list) => list.len(),
            _ => return Err(LkvError::WrongType),
        };
        obj.touch(now_ms());
        Ok(len)
    }

    /// Range with negative-index adjustment and clamping.
    pub fn list_range(&self, key: &[u8], begin: i64, end: i64) -> LkvResult<Vec<Vec<u8>>> {
        let bucket = self.bucket(key);
        let mut map = bucket.map.lock();
        let obj = map.get_mut(key).ok_or(LkvError::NotFound)?;
        let list = match &obj.value {
            Value::List(list) => list,
            _ => return Err(LkvError::WrongType),
        };
        let len = list.len() as i64;
        let mut begin = if begin < 0 { begin + len } else { begin };
        let end = if end < 0 { end + len } else { end };
        // Both still negative: nothing to return. A lone negative begin
        // clamps to the head.
        if begin < 0 && end < 0 {
            obj.touch(now_ms());
            return Ok(Vec::new());
        }
        if begin < 0 {
            begin = 0;
        }
        if end < begin {
            obj.touch(now_ms());
            return Ok(Vec::new());
        }
        let values = list
            .range(begin as usize, end as usize)
            .into_iter()
            .map(|s| s.as_bytes().to_vec())
            .collect();
        obj.touch(now_ms());
        Ok(values)
    }

    /// Element at `idx` (negative counts from the back); `Ok(None)` when the
    /// index falls outside the list.
    pub fn list_index(&self, key: &[u8], idx: i64) -> LkvResult<Option<Vec<u8>>> {
        let bucket = self.bucket(key);
        let mut map = bucket.map.lock();
        let obj = map.get_mut(key).ok_or(LkvError::NotFound)?;
        let list = match &obj.value {
            Value::List(list) => list,
            _ => return Err(LkvError::WrongType),
        };
        let len = list.len() as i64;
        let idx = if idx < 0 { idx + len } else { idx };
        if idx < 0 {
            obj.touch(now_ms());
            return Ok(None);
        }
        let value = list.get(idx as usize).map(|s| s.as_bytes().to_vec());
        obj.touch(now_ms());
        Ok(value)
    }

    /// Overwrites the element at `idx`; out-of-range is an error on writes.
    pub fn list_set(&self, key: &[u8], idx: i64, value: &[u8]) -> LkvResult<()> {
        let bucket = self.bucket(key);
        let mut map = bucket.map.lock();
        let obj = map.get_mut(key).ok_or(LkvError::NotFound)?;
        let list = match &mut obj.value {
            Value::List(list) => list,
            _ => return Err(LkvError::WrongType),
        };
        let len = list.len() as i64;
        let idx = if idx < 0 { idx + len } else { idx };
        if idx < 0 || !list.set(idx as usize, value) {
            return Err(LkvError::OutOfRange);
        }
        obj.touch(now_ms());
        Ok(())
    }

    // ---- hash -------------------------------------------------------------

    /// Sets fields, creating the hash on first use. Returns how many fields
    /// were written.
    pub fn hash_set(&self, key: &[u8], pairs: &[(Vec<u8>, Vec<u8>)]) -> LkvResult<usize> {
        let bucket = self.bucket(key);
        let mut map = bucket.map.lock();
        if map.get(key).is_none() {
            self.install(&mut map, key, Value::Hash(RehashMap::new()));
        }
        let obj = map.get_mut(key).expect("installed above");
        let hash = match &mut obj.value {
            Value::Hash(hash) => hash,
            _ => return Err(LkvError::WrongType),
        };
        let mut written = 0;
        for (field, value) in pairs {
            match hash.put(field, value) {
                MapPut::Inserted | MapPut::Updated => written += 1,
            }
        }
        obj.touch(now_ms());
        Ok(written)
    }

    /// Field lookup; `Ok(None)` when the field is absent.
    pub fn hash_get(&self, key: &[u8], field: &[u8]) -> LkvResult<Option<Vec<u8>>> {
        let bucket = self.bucket(key);
        let mut map = bucket.map.lock();
        let obj = map.get_mut(key).ok_or(LkvError::NotFound)?;
        let hash = match &mut obj.value {
            Value::Hash(hash) => hash,
            _ => return Err(LkvError::WrongType),
        };
        let value = hash.get(field).map(|v| v.as_bytes().to_vec());
        obj.touch(now_ms());
        Ok(value)
    }

    /// Multi-field lookup preserving request order; absent fields yield
    /// `None` slots.
    pub fn hash_get_multi(
        &self,
        key: &[u8],
        fields: &[Vec<u8>],
    ) -> LkvResult<Vec<Option<Vec<u8>>>> {
        let bucket = self.bucket(key);
        let mut map = bucket.map.lock();
        let obj = map.get_mut(key).ok_or(LkvError::NotFound)?;
        let hash = match &mut obj.value {
            Value::Hash(hash) => hash,
            _ => return Err(LkvError::WrongType),
        };
        let values = fields
            .iter()
            .map(|field| hash.get(field).map(|v| v.as_bytes().to_vec()))
            .collect();
        obj.touch(now_ms());
        Ok(values)
    }

    pub fn hash_del(&self, key: &[u8], fields: &[Vec<u8>]) -> LkvResult<usize> {
        let bucket = self.bucket(key);
        let mut map = bucket.map.lock();
        let obj = map.get_mut(key).ok_or(LkvError::NotFound)?;
        let hash = match &mut obj.value {
            Value::Hash(hash) => hash,
            _ => return Err(LkvError::WrongType),
        };
        let erased = fields.iter().filter(|field| hash.remove(field)).count();
        obj.touch(now_ms());
        Ok(erased)
    }

    pub fn hash_exists(&self, key: &[u8], field: &[u8]) -> LkvResult<bool> {
        let bucket = self.bucket(key);
        let mut map = bucket.map.lock();
        let obj = map.get_mut(key).ok_or(LkvError::NotFound)?;
        let hash = match &mut obj.value {
            Value::Hash(hash) => hash,
            _ => return Err(LkvError::WrongType),
        };
        let present = hash.contains(field);
        obj.touch(now_ms());
        Ok(present)
    }

    /// All pairs flattened as `f1, v1, f2, v2, …`.
    pub fn hash_entries(&self, key: &[u8]) -> LkvResult<Vec<Vec<u8>>> {
        let bucket = self.bucket(key);
        let mut map = bucket.map.lock();
        let obj = map.get_mut(key).ok_or(LkvError::NotFound)?;
        let hash = match &obj.value {
            Value::Hash(hash) => hash,
            _ => return Err(LkvError::WrongType),
        };
        let mut flat = Vec::with_capacity(hash.len() * 2);
        hash.for_each(|field, value| {
            flat.push(field.as_bytes().to_vec());
            flat.push(value.as_bytes().to_vec());
        });
        obj.touch(now_ms());
        Ok(flat)
    }

    pub fn hash_keys(&self, key: &[u8]) -> LkvResult<Vec<Vec<u8>>> {
        let bucket = self.bucket(key);
        let mut map = bucket.map.lock();
        let obj = map.get_mut(key).ok_or(LkvError::NotFound)?;
        let hash = match &obj.value {
            Value::Hash(hash) => hash,
            _ => return Err(LkvError::WrongType),
        };
        let keys = hash.keys().into_iter().map(|k| k.as_bytes().to_vec()).collect();
        obj.touch(now_ms());
        Ok(keys)
    }

    pub fn hash_vals(&self, key: &[u8]) -> LkvResult<Vec<Vec<u8>>> {
        let bucket = self.bucket(key);
        let mut map = bucket.map.lock();
        let obj = map.get_mut(key).ok_or(LkvError::NotFound)?;
        let hash = match &obj.value {
            Value::Hash(hash) => hash,
            _ => return Err(LkvError::WrongType),
        };
        let vals = hash.values().into_iter().map(|v| v.as_bytes().to_vec()).collect();
        obj.touch(now_ms());
        Ok(vals)
    }

    pub fn hash_len(&self, key: &[u8]) -> LkvResult<usize> {
        let bucket = self.bucket(key);
        let mut map = bucket.map.lock();
        let obj = map.get_mut(key).ok_or(LkvError::NotFound)?;
        let len = match &obj.value {
            Value::Hash(hash) => hash.len(),
            _ => return Err(LkvError::WrongType),
        };
        obj.touch(now_ms());
        Ok(len)
    }

    // ---- set --------------------------------------------------------------

    /// Adds members, creating the set on first use. Returns how many were
    /// new.
    pub fn set_add(&self, key: &[u8], members: &[Vec<u8>]) -> LkvResult<usize> {
        let bucket = self.bucket(key);
        let mut map = bucket.map.lock();
        if map.get(key).is_none() {
            self.install(&mut map, key, Value::Set(RehashSet::new()));
        }
        let obj = map.get_mut(key).expect("installed above");
        let set = match &mut obj.value {
            Value::Set(set) => set,
            _ => return Err(LkvError::WrongType),
        };
        let added = members
            .iter()
            .filter(|member| set.insert(member) == SetAdd::Inserted)
            .count();
        obj.touch(now_ms());
        Ok(added)
    }

    pub fn set_is_member(&self, key: &[u8], member: &[u8]) -> LkvResult<bool> {
        let bucket = self.bucket(key);
        let mut map = bucket.map.lock();
        let obj = map.get_mut(key).ok_or(LkvError::NotFound)?;
        let set = match &mut obj.value {
            Value::Set(set) => set,
            _ => return Err(LkvError::WrongType),
        };
        let present = set.contains(member);
        obj.touch(now_ms());
        Ok(present)
    }

    pub fn set_mis_member(&self, key: &[u8], members: &[Vec<u8>]) -> LkvResult<Vec<bool>> {
        let bucket = self.bucket(key);
        let mut map = bucket.map.lock();
        let obj = map.get_mut(key).ok_or(LkvError::NotFound)?;
        let set = match &mut obj.value {
            Value::Set(set) => set,
            _ => return Err(LkvError::WrongType),
        };
        let hits = members.iter().map(|member| set.contains(member)).collect();
        obj.touch(now_ms());
        Ok(hits)
    }

    pub fn set_members(&self, key: &[u8]) -> LkvResult<Vec<Vec<u8>>> {
        let bucket = self.bucket(key);
        let mut map = bucket.map.lock();
        let obj = map.get_mut(key).ok_or(LkvError::NotFound)?;
        let set = match &obj.value {
            Value::Set(set) => set,
            _ => return Err(LkvError::WrongType),
        };
        let members = set.members().into_iter().map(|m| m.as_bytes().to_vec()).collect();
        obj.touch(now_ms());
        Ok(members)
    }

    pub fn set_remove(&self, key: &[u8], members: &[Vec<u8>]) -> LkvResult<usize> {
        let bucket = self.bucket(key);
        let mut map = bucket.map.lock();
        let obj = map.get_mut(key).ok_or(LkvError::NotFound)?;
        let set = match &mut obj.value {
            Value::Set(set) => set,
            _ => return Err(LkvError::WrongType),
        };
        let removed = members.iter().filter(|member| set.remove(member)).count();
        obj.touch(now_ms());
        Ok(removed)
    }

    pub fn set_card(&self, key: &[u8]) -> LkvResult<usize> {
        let bucket = self.bucket(key);
        let mut map = bucket.map.lock();
        let obj = map.get_mut(key).ok_or(LkvError::NotFound)?;
        let card = match &obj.value {
            Value::Set(set) => set.len(),
            _ => return Err(LkvError::WrongType),
        };
        obj.touch(now_ms());
        Ok(card)
    }

    // ---- command reconstruction -------------------------------------------

    /// Rebuilds a command that would recreate the key's current value.
    /// Used when a TTL is cleared so replay forgets the expiry.
    pub fn recover_command(&self, key: &[u8]) -> Option<Vec<Vec<u8>>> {
        let bucket = self.bucket(key);
        let map = bucket.map.lock();
        let obj = map.get(key)?;
        let mut argv: Vec<Vec<u8>> = Vec::new();
        match &obj.value {
            Value::Int(n) => {
                argv.push(b"set".to_vec());
                argv.push(key.to_vec());
                argv.push(n.to_string().into_bytes());
            }
            Value::Str(s) => {
                argv.push(b"set".to_vec());
                argv.push(key.to_vec());
                argv.push(s.as_bytes().to_vec());
            }
            Value::List(list) => {
                argv.push(b"rpush".to_vec());
                argv.push(key.to_vec());
                for item in list.range_all() {
                    argv.push(item.as_bytes().to_vec());
                }
            }
            Value::Hash(hash) => {
                argv.push(b"hset".to_vec());
                argv.push(key.to_vec());
                hash.for_each(|field, value| {
                    argv.push(field.as_bytes().to_vec());
                    argv.push(value.as_bytes().to_vec());
                });
            }
            Value::Set(set) => {
                argv.push(b"sadd".to_vec());
                argv.push(key.to_vec());
                set.for_each(|member, _| argv.push(member.as_bytes().to_vec()));
            }
        }
        Some(argv)
    }

    // ---- eviction ---------------------------------------------------------

    /// Evicts up to `limit` keys; returns the keys actually removed.
    pub fn evict(&self, policy: EvictionPolicy, limit: usize) -> Vec<Vec<u8>> {
        if self.pool.lock().len() == 0 {
            return Vec::new();
        }
        match policy {
            EvictionPolicy::Random => self.evict_random(limit),
            EvictionPolicy::LruApprox => self.evict_lru(limit),
        }
    }

    fn evict_random(&self, limit: usize) -> Vec<Vec<u8>> {
        let mut rng = rand::thread_rng();
        let rounds = limit.min(self.pool.lock().len());
        let mut deleted = Vec::new();
        for _ in 0..rounds {
            let candidate = {
                let pool = self.pool.lock();
                pool.sample(&mut rng)
            };
            if let Some(key) = candidate {
                if self.delete(&key) {
                    deleted.push(key.to_vec());
                }
            }
        }
        deleted
    }

    fn evict_lru(&self, limit: usize) -> Vec<Vec<u8>> {
        let mut rng = rand::thread_rng();
        let mut deleted = Vec::new();
        let start = now_ms();
        while deleted.len() < limit && self.pool.lock().len() > 0 {
            self.evict_lru_round(&mut rng, &mut deleted);
            if now_ms() - start > LRU_EVICTION_TIME_LIMIT_MS {
                break;
            }
        }
        deleted
    }

    /// One round: sample a group of distinct candidates and drop the one
    /// with the oldest last-visit stamp.
    fn evict_lru_round(&self, rng: &mut impl Rng, deleted: &mut Vec<Vec<u8>>) {
        let mut candidates: Vec<Arc<[u8]>> = Vec::with_capacity(LRU_SAMPLE_GROUP);
        {
            let pool = self.pool.lock();
            for _ in 0..LRU_SAMPLE_GROUP {
                if let Some(key) = pool.sample(rng) {
                    if !candidates.iter().any(|c| c.as_ref() == key.as_ref()) {
                        candidates.push(key);
                    }
                }
            }
        }
        let oldest = candidates
            .into_iter()
            .filter_map(|key| self.last_visit(&key).map(|stamp| (stamp, key)))
            .min_by_key(|(stamp, _)| *stamp);
        if let Some((_, key)) = oldest {
            if self.delete(&key) {
                deleted.push(key.to_vec());
            }
        }
    }

    /// Key-pool size; test hook for the pool consistency invariant.
    pub fn pool_len(&self) -> usize {
        self.pool.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_int_and_string() {
        let store = KvStore::new();
        store.set_int(b"n", 41);
        assert_eq!(store.get_scalar(b"n").unwrap(), ScalarValue::Int(41));
        store.set_str(b"s", b"hello");
        assert_eq!(
            store.get_scalar(b"s").unwrap(),
            ScalarValue::Bytes(b"hello".to_vec())
        );
        assert!(matches!(
            store.get_scalar(b"missing"),
            Err(LkvError::NotFound)
        ));
    }

    #[test]
    fn overwrite_changes_kind_in_place() {
        let store = KvStore::new();
        store.list_push(b"k", &[b"a".to_vec()], false).unwrap();
        assert_eq!(store.type_of(b"k"), Some("list"));
        store.set_int(b"k", 7);
        assert_eq!(store.type_of(b"k"), Some("int"));
        store.set_str(b"k", b"text");
        assert_eq!(store.type_of(b"k"), Some("string"));
        // Kind changes never duplicate the key in the pool.
        assert_eq!(store.pool_len(), 1);
    }

    #[test]
    fn incr_decr_create_and_overflow() {
        let store = KvStore::new();
        assert_eq!(store.incr_by(b"c", 5).unwrap(), 5);
        assert_eq!(store.incr_by(b"c", 2).unwrap(), 7);
        assert_eq!(store.decr_by(b"c", 10).unwrap(), -3);

        store.set_int(b"max", i64::MAX);
        assert!(matches!(store.incr_by(b"max", 1), Err(LkvError::Overflow)));
        store.set_int(b"min", i64::MIN);
        assert!(matches!(store.decr_by(b"min", 1), Err(LkvError::Overflow)));

        store.set_str(b"s", b"x");
        assert!(matches!(store.incr_by(b"s", 1), Err(LkvError::WrongType)));
    }

    #[test]
    fn append_promotes_int() {
        let store = KvStore::new();
        store.set_int(b"k", 12);
        assert_eq!(store.append(b"k", b"ab").unwrap(), 4);
        assert_eq!(
            store.get_scalar(b"k").unwrap(),
            ScalarValue::Bytes(b"12ab".to_vec())
        );
        assert_eq!(store.type_of(b"k"), Some("string"));
        assert!(matches!(store.append(b"nope", b"x"), Err(LkvError::NotFound)));
    }

    #[test]
    fn strlen_covers_both_scalars() {
        let store = KvStore::new();
        store.set_int(b"n", -120);
        assert_eq!(store.strlen(b"n").unwrap(), 4);
        store.set_str(b"s", b"abcde");
        assert_eq!(store.strlen(b"s").unwrap(), 5);
    }

    #[test]
    fn list_operations_roundtrip() {
        let store = KvStore::new();
        let len = store
            .list_push(b"L", &[b"a".to_vec(), b"b".to_vec(), b"c".to_vec()], false)
            .unwrap();
        assert_eq!(len, 3);
        assert_eq!(store.list_len(b"L").unwrap(), 3);
        assert_eq!(store.list_pop(b"L", true).unwrap().unwrap(), b"a");
        assert_eq!(
            store.list_range(b"L", 0, -1).unwrap(),
            vec![b"b".to_vec(), b"c".to_vec()]
        );
        store.list_set(b"L", -1, b"z").unwrap();
        assert_eq!(store.list_index(b"L", 1).unwrap().unwrap(), b"z");
        assert_eq!(store.list_index(b"L", 9).unwrap(), None);
        assert!(matches!(
            store.list_set(b"L", 9, b"q"),
            Err(LkvError::OutOfRange)
        ));
    }

    #[test]
    fn list_range_negative_rules() {
        let store = KvStore::new();
        let values: Vec<Vec<u8>> = (0..5).map(|i| i.to_string().into_bytes()).collect();
        store.list_push(b"L", &values, false).unwrap();
        assert_eq!(
            store.list_range(b"L", -2, -1).unwrap(),
            vec![b"3".to_vec(), b"4".to_vec()]
        );
        assert!(store.list_range(b"L", -100, -90).unwrap().is_empty());
        assert_eq!(store.list_range(b"L", -100, 1).unwrap().len(), 2);
        assert!(store.list_range(b"L", 3, 1).unwrap().is_empty());
        assert_eq!(store.list_range(b"L", 0, 100).unwrap().len(), 5);
    }

    #[test]
    fn lpush_orders_like_repeated_prepends() {
        let store = KvStore::new();
        store
            .list_push(b"L", &[b"a".to_vec(), b"b".to_vec()], true)
            .unwrap();
        assert_eq!(
            store.list_range(b"L", 0, -1).unwrap(),
            vec![b"b".to_vec(), b"a".to_vec()]
        );
    }

    #[test]
    fn hash_operations_roundtrip() {
        let store = KvStore::new();
        let pairs = vec![
            (b"a".to_vec(), b"1".to_vec()),
            (b"b".to_vec(), b"2".to_vec()),
        ];
        assert_eq!(store.hash_set(b"H", &pairs).unwrap(), 2);
        assert_eq!(store.hash_get(b"H", b"a").unwrap().unwrap(), b"1");
        assert_eq!(store.hash_get(b"H", b"zz").unwrap(), None);
        assert!(store.hash_exists(b"H", b"b").unwrap());
        assert_eq!(store.hash_len(b"H").unwrap(), 2);
        assert_eq!(store.hash_del(b"H", &[b"b".to_vec()]).unwrap(), 1);
        assert_eq!(store.hash_len(b"H").unwrap(), 1);
        assert_eq!(store.hash_entries(b"H").unwrap().len(), 2);
        let multi = store
            .hash_get_multi(b"H", &[b"a".to_vec(), b"b".to_vec()])
            .unwrap();
        assert_eq!(multi, vec![Some(b"1".to_vec()), None]);
    }

    #[test]
    fn set_operations_roundtrip() {
        let store = KvStore::new();
        let members = vec![b"x".to_vec(), b"y".to_vec(), b"x".to_vec()];
        assert_eq!(store.set_add(b"S", &members).unwrap(), 2);
        assert!(store.set_is_member(b"S", b"x").unwrap());
        assert!(!store.set_is_member(b"S", b"q").unwrap());
        assert_eq!(store.set_card(b"S").unwrap(), 2);
        assert_eq!(
            store.set_mis_member(b"S", &[b"x".to_vec(), b"q".to_vec()]).unwrap(),
            vec![true, false]
        );
        assert_eq!(store.set_remove(b"S", &[b"y".to_vec()]).unwrap(), 1);
        assert_eq!(store.set_members(b"S").unwrap(), vec![b"x".to_vec()]);
    }

    #[test]
    fn wrong_type_is_rejected_everywhere() {
        let store = KvStore::new();
        store.set_str(b"K", b"scalar");
        assert!(matches!(
            store.list_push(b"K", &[b"x".to_vec()], true),
            Err(LkvError::WrongType)
        ));
        assert!(matches!(
            store.hash_set(b"K", &[(b"f".to_vec(), b"v".to_vec())]),
            Err(LkvError::WrongType)
        ));
        assert!(matches!(
            store.set_add(b"K", &[b"m".to_vec()]),
            Err(LkvError::WrongType)
        ));
        store.list_push(b"L", &[b"x".to_vec()], false).unwrap();
        assert!(matches!(store.get_scalar(b"L"), Err(LkvError::WrongType)));
    }

    #[test]
    fn pool_tracks_live_keys_exactly() {
        let store = KvStore::new();
        for i in 0..50 {
            store.set_int(format!("k{i}").as_bytes(), i);
        }
        assert_eq!(store.pool_len(), 50);
        assert_eq!(store.num_items(), 50);
        for i in 0..25 {
            assert!(store.delete(format!("k{i}").as_bytes()));
        }
        assert_eq!(store.pool_len(), 25);
        assert_eq!(store.num_items(), 25);
        assert!(!store.delete(b"k0"));
    }

    #[test]
    fn random_eviction_respects_the_bound() {
        let store = KvStore::new();
        for i in 0..40 {
            store.set_int(format!("k{i}").as_bytes(), i);
        }
        let removed = store.evict(EvictionPolicy::Random, 10);
        assert!(removed.len() <= 10);
        assert_eq!(store.num_items(), 40 - removed.len());
        assert_eq!(store.pool_len(), store.num_items());
    }

    #[test]
    fn lru_eviction_spares_the_hot_key() {
        let store = KvStore::new();
        for i in 0..20 {
            store.set_int(format!("k{i}").as_bytes(), i);
        }
        store.set_int(b"hot", 1);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let _ = store.get_scalar(b"hot");
        // The hot key only loses a round against itself, so it survives.
        let removed = store.evict(EvictionPolicy::LruApprox, 10);
        assert!(removed.len() <= 10);
        assert!(!removed.is_empty());
        assert!(store.exists(b"hot"));
        assert_eq!(store.pool_len(), store.num_items());
    }

    #[test]
    fn eviction_on_empty_store_is_a_noop() {
        let store = KvStore::new();
        assert!(store.evict(EvictionPolicy::Random, 8).is_empty());
        assert!(store.evict(EvictionPolicy::LruApprox, 8).is_empty());
    }

    #[test]
    fn recover_command_rebuilds_each_kind() {
        let store = KvStore::new();
        store.set_int(b"i", 9);
        assert_eq!(
            store.recover_command(b"i").unwrap(),
            vec![b"set".to_vec(), b"i".to_vec(), b"9".to_vec()]
        );
        store.list_push(b"l", &[b"a".to_vec(), b"b".to_vec()], false).unwrap();
        assert_eq!(
            store.recover_command(b"l").unwrap(),
            vec![b"rpush".to_vec(), b"l".to_vec(), b"a".to_vec(), b"b".to_vec()]
        );
        store.hash_set(b"h", &[(b"f".to_vec(), b"v".to_vec())]).unwrap();
        assert_eq!(
            store.recover_command(b"h").unwrap(),
            vec![b"hset".to_vec(), b"h".to_vec(), b"f".to_vec(), b"v".to_vec()]
        );
        store.set_add(b"s", &[b"m".to_vec()]).unwrap();
        assert_eq!(
            store.recover_command(b"s").unwrap(),
            vec![b"sadd".to_vec(), b"s".to_vec(), b"m".to_vec()]
        );
        assert!(store.recover_command(b"missing").is_none());
    }

    #[test]
    fn overview_counts_by_kind() {
        let store = KvStore::new();
        store.set_int(b"i", 1);
        store.set_str(b"s", b"v");
        store.list_push(b"l", &[b"a".to_vec(), b"b".to_vec()], false).unwrap();
        store.hash_set(b"h", &[(b"f".to_vec(), b"v".to_vec())]).unwrap();
        store.set_add(b"t", &[b"m".to_vec(), b"n".to_vec()]).unwrap();
        let view = store.overview();
        assert_eq!(view.n_int, 1);
        assert_eq!(view.n_str, 1);
        assert_eq!(view.n_list, 1);
        assert_eq!(view.n_list_elems, 2);
        assert_eq!(view.n_hash, 1);
        assert_eq!(view.n_hash_entries, 1);
        assert_eq!(view.n_set, 1);
        assert_eq!(view.n_set_members, 2);
    }
}
