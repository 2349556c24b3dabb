//! # Incrementally-Rehashing Hash Containers
//!
//! Purpose: Provide the map (field → value) and set (member) containers
//! used inside hash and set values, with load-factor-triggered gradual
//! rehashing so no single operation pays for a full table move.
//!
//! ## Design Principles
//! 1. **Chained Slots**: Open hashing with per-slot chains of box-linked
//!    entries; teardown walks chains iteratively so deep chains cannot
//!    overflow the stack on drop.
//! 2. **Two Tables**: `current` always exists; `shadow` exists only while a
//!    rehash is in flight, at twice the slot count.
//! 3. **Cursor Stepping**: Every public operation advances the rehash cursor
//!    by one occupied slot, draining `current` into `shadow` a chain at a
//!    time. Lookups consult `current` first, then `shadow`; fresh inserts go
//!    to `shadow` while rehashing.
//! 4. **One Home Per Key**: A key lives in exactly one of the two tables at
//!    any instant, and `len == current.len + shadow.len`.

use crate::bytestr::ByteStr;

const INITIAL_SLOTS: usize = 16;
const GROW_FACTOR: usize = 2;
const DEFAULT_MAX_LOAD: f64 = 1.0;

/// Outcome of a map `put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapPut {
    Inserted,
    Updated,
}

/// Outcome of a set `insert`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetAdd {
    Inserted,
    Existed,
}

type Link<V> = Option<Box<Entry<V>>>;

#[derive(Debug)]
struct Entry<V> {
    key: ByteStr,
    value: V,
    next: Link<V>,
}

/// One raw table: a slot array of entry chains.
#[derive(Debug)]
struct Table<V> {
    slots: Vec<Link<V>>,
    count: usize,
}

impl<V> Table<V> {
    fn new(slot_count: usize) -> Self {
        let mut slots = Vec::with_capacity(slot_count);
        slots.resize_with(slot_count, || None);
        Table { slots, count: 0 }
    }

    #[inline]
    fn slot_of(&self, key: &[u8]) -> usize {
        (crate::bytestr::hash33(key) % self.slots.len() as u64) as usize
    }

    fn load_factor(&self) -> f64 {
        self.count as f64 / self.slots.len() as f64
    }

    fn find(&self, key: &[u8]) -> Option<&Entry<V>> {
        let mut cursor = self.slots[self.slot_of(key)].as_deref();
        while let Some(entry) = cursor {
            if entry.key.as_bytes() == key {
                return Some(entry);
            }
            cursor = entry.next.as_deref();
        }
        None
    }

    fn find_mut(&mut self, key: &[u8]) -> Option<&mut Entry<V>> {
        let slot = self.slot_of(key);
        let mut cursor = self.slots[slot].as_deref_mut();
        while let Some(entry) = cursor {
            if entry.key.as_bytes() == key {
                return Some(entry);
            }
            cursor = entry.next.as_deref_mut();
        }
        None
    }

    /// Links an entry at the head of its slot chain.
    fn insert_boxed(&mut self, mut entry: Box<Entry<V>>) {
        let slot = self.slot_of(entry.key.as_bytes());
        entry.next = self.slots[slot].take();
        self.slots[slot] = Some(entry);
        self.count += 1;
    }

    /// Unlinks and returns the entry for `key`.
    fn remove(&mut self, key: &[u8]) -> Option<Box<Entry<V>>> {
        let slot = self.slot_of(key);
        // Head removal first, then walk the chain relinking around the hit.
        if self.slots[slot]
            .as_ref()
            .map(|e| e.key.as_bytes() == key)
            .unwrap_or(false)
        {
            let mut removed = self.slots[slot].take().expect("head checked above");
            self.slots[slot] = removed.next.take();
            self.count -= 1;
            return Some(removed);
        }
        let mut cursor = self.slots[slot].as_deref_mut();
        while let Some(entry) = cursor {
            let hit = entry
                .next
                .as_ref()
                .map(|n| n.key.as_bytes() == key)
                .unwrap_or(false);
            if hit {
                let mut removed = entry.next.take().expect("hit checked above");
                entry.next = removed.next.take();
                self.count -= 1;
                return Some(removed);
            }
            cursor = entry.next.as_deref_mut();
        }
        None
    }

    /// Index of the first occupied slot at or after `from`.
    fn next_occupied(&self, from: usize) -> Option<usize> {
        (from..self.slots.len()).find(|&idx| self.slots[idx].is_some())
    }

    fn for_each(&self, mut f: impl FnMut(&ByteStr, &V)) {
        for slot in &self.slots {
            let mut cursor = slot.as_deref();
            while let Some(entry) = cursor {
                f(&entry.key, &entry.value);
                cursor = entry.next.as_deref();
            }
        }
    }
}

impl<V> Drop for Table<V> {
    fn drop(&mut self) {
        // Unlink chains iteratively; the default recursive drop of box
        // chains can exhaust the stack on adversarial slot collisions.
        for slot in &mut self.slots {
            let mut cursor = slot.take();
            while let Some(mut entry) = cursor {
                cursor = entry.next.take();
            }
        }
    }
}

/// Rehashing wrapper shared by the map and set variants.
#[derive(Debug)]
pub struct Rehashing<V> {
    current: Table<V>,
    shadow: Option<Table<V>>,
    /// Cursor into `current`: next occupied slot to migrate.
    cursor: Option<usize>,
    max_load: f64,
}

/// Field → value container backing hash values.
pub type RehashMap = Rehashing<ByteStr>;

/// Member container backing set values.
pub type RehashSet = Rehashing<()>;

impl<V> Default for Rehashing<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Rehashing<V> {
    pub fn new() -> Self {
        Rehashing {
            current: Table::new(INITIAL_SLOTS),
            shadow: None,
            cursor: None,
            max_load: DEFAULT_MAX_LOAD,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.current.count + self.shadow.as_ref().map(|t| t.count).unwrap_or(0)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while a gradual rehash is in flight.
    pub fn is_rehashing(&self) -> bool {
        self.shadow.is_some()
    }

    pub fn contains(&mut self, key: &[u8]) -> bool {
        self.step();
        self.current.find(key).is_some()
            || self
                .shadow
                .as_ref()
                .map(|t| t.find(key).is_some())
                .unwrap_or(false)
    }

    /// Removes `key` from whichever table holds it.
    pub fn remove(&mut self, key: &[u8]) -> bool {
        self.step();
        if self.current.remove(key).is_some() {
            return true;
        }
        self.shadow
            .as_mut()
            .map(|t| t.remove(key).is_some())
            .unwrap_or(false)
    }

    /// All keys, current table first.
    pub fn keys(&self) -> Vec<ByteStr> {
        let mut keys = Vec::with_capacity(self.len());
        self.current.for_each(|k, _| keys.push(k.clone()));
        if let Some(shadow) = &self.shadow {
            shadow.for_each(|k, _| keys.push(k.clone()));
        }
        keys
    }

    /// Visits every entry without advancing the rehash cursor.
    pub fn for_each(&self, mut f: impl FnMut(&ByteStr, &V)) {
        self.current.for_each(&mut f);
        if let Some(shadow) = &self.shadow {
            shadow.for_each(&mut f);
        }
    }

    /// Advances the rehash by one occupied slot of `current`.
    ///
    /// Starts a rehash when the load factor crosses the threshold, and
    /// promotes `shadow` once `current` is fully drained.
    fn step(&mut self) {
        if self.shadow.is_none() {
            if self.current.load_factor() <= self.max_load {
                return;
            }
            self.cursor = self.current.next_occupied(0);
            self.shadow = Some(Table::new(self.current.slots.len() * GROW_FACTOR));
        }

        let shadow = self.shadow.as_mut().expect("rehash in flight");
        if let Some(idx) = self.cursor {
            let mut chain = self.current.slots[idx].take();
            while let Some(mut entry) = chain {
                chain = entry.next.take();
                self.current.count -= 1;
                shadow.insert_boxed(entry);
            }
            self.cursor = self.current.next_occupied(idx + 1);
        }

        if self.cursor.is_none() && self.current.count == 0 {
            self.current = self.shadow.take().expect("rehash in flight");
        }
    }

    /// Table that receives brand-new entries.
    fn insert_target(&mut self) -> &mut Table<V> {
        match self.shadow.as_mut() {
            Some(shadow) => shadow,
            None => &mut self.current,
        }
    }
}

impl RehashMap {
    /// Inserts or overwrites a field.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> MapPut {
        self.step();
        if let Some(entry) = self.current.find_mut(key) {
            entry.value.reset(value);
            return MapPut::Updated;
        }
        if let Some(shadow) = self.shadow.as_mut() {
            if let Some(entry) = shadow.find_mut(key) {
                entry.value.reset(value);
                return MapPut::Updated;
            }
        }
        let entry = Box::new(Entry {
            key: ByteStr::from_bytes(key),
            value: ByteStr::from_bytes(value),
            next: None,
        });
        self.insert_target().insert_boxed(entry);
        MapPut::Inserted
    }

    /// Looks up a field, stepping the rehash cursor.
    pub fn get(&mut self, key: &[u8]) -> Option<&ByteStr> {
        self.step();
        // Borrow-wise the two probes must be sequential; a key never lives
        // in both tables.
        if self.current.find(key).is_some() {
            return self.current.find(key).map(|e| &e.value);
        }
        self.shadow
            .as_ref()
            .and_then(|t| t.find(key))
            .map(|e| &e.value)
    }

    /// All values, matching the traversal order of `keys`.
    pub fn values(&self) -> Vec<ByteStr> {
        let mut values = Vec::with_capacity(self.len());
        self.for_each(|_, v| values.push(v.clone()));
        values
    }

    /// All (field, value) pairs.
    pub fn entries(&self) -> Vec<(ByteStr, ByteStr)> {
        let mut entries = Vec::with_capacity(self.len());
        self.for_each(|k, v| entries.push((k.clone(), v.clone())));
        entries
    }
}

impl RehashSet {
    /// Adds a member; reports whether it was already present.
    pub fn insert(&mut self, key: &[u8]) -> SetAdd {
        self.step();
        if self.current.find(key).is_some()
            || self
                .shadow
                .as_ref()
                .map(|t| t.find(key).is_some())
                .unwrap_or(false)
        {
            return SetAdd::Existed;
        }
        let entry = Box::new(Entry {
            key: ByteStr::from_bytes(key),
            value: (),
            next: None,
        });
        self.insert_target().insert_boxed(entry);
        SetAdd::Inserted
    }

    /// All members.
    pub fn members(&self) -> Vec<ByteStr> {
        self.keys()
    }
}
