//! # LiteKV Engine
//!
//! Wires the sharded keyspace, the timer scheduler, the append-only log,
//! and the snapshot codec into one command-execution engine. The server
//! crate owns the sockets; everything stateful lives here.

pub mod aof;
pub mod dispatch;
pub mod mem;
pub mod snapshot;

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use lkv_common::time::now_ms;
use lkv_common::{Config, LkvResult};
use lkv_core::{EvictionPolicy, KvStore, TimerHolder, TtlTable};

pub use aof::{compact_log, AppendLog, CompactStats};
pub use dispatch::SessionHooks;
pub use snapshot::{LoadStats, SnapshotRecord, SnapshotValue};

use mem::MemSampler;

/// The storage and execution engine behind every session.
pub struct Engine {
    pub(crate) store: Arc<KvStore>,
    pub(crate) timers: Arc<TimerHolder>,
    pub(crate) ttl: Arc<TtlTable>,
    pub(crate) log: Option<AppendLog>,
    pub(crate) sampler: Option<MemSampler>,
    pub(crate) policy: EvictionPolicy,
    pub(crate) config: Config,
}

impl Engine {
    /// Engine with persistence at `config.dumpfile`.
    pub fn new(config: Config) -> Self {
        let log = AppendLog::open(&config.dumpfile, config.dump_cachesize);
        Self::build(config, Some(log))
    }

    /// Engine without persistence; tests and offline tools.
    pub fn in_memory(config: Config) -> Self {
        Self::build(config, None)
    }

    fn build(config: Config, log: Option<AppendLog>) -> Self {
        let policy = if config.lru_enabled {
            EvictionPolicy::LruApprox
        } else {
            EvictionPolicy::Random
        };
        let sampler = (config.maxmem_mb > 0).then(MemSampler::start);
        Engine {
            store: Arc::new(KvStore::new()),
            timers: Arc::new(TimerHolder::new()),
            ttl: Arc::new(TtlTable::new()),
            log,
            sampler,
            policy,
            config,
        }
    }

    pub fn store(&self) -> &KvStore {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Replays the append log into the fresh keyspace.
    pub fn restore(&self) -> LkvResult<u64> {
        let log = match &self.log {
            Some(log) => log,
            None => return Ok(0),
        };
        let records = log.replay(|cmd| {
            self.dispatch(&cmd, false, None);
        })?;
        info!(records, keys = self.store.num_items(), "state restored from append log");
        Ok(records)
    }

    /// Fires due TTL timers; called from the reactor's idle path.
    pub fn fire_expired(&self) -> usize {
        self.timers.fire_due()
    }

    /// Milliseconds until the next scheduled timer.
    pub fn ms_until_next_timer(&self) -> Option<u64> {
        self.timers.ms_until_next()
    }

    /// Synchronously drains the append-log buffers to disk.
    pub fn flush_log(&self) -> LkvResult<()> {
        match &self.log {
            Some(log) => log.flush(),
            None => Ok(()),
        }
    }

    /// Absolute expiry of a key with a live TTL.
    pub fn expire_at_ms(&self, key: &[u8]) -> Option<u64> {
        self.ttl
            .timer_of(key)
            .and_then(|id| self.timers.fire_at(id))
    }

    /// Number of keys with a live TTL; test hook.
    pub fn ttl_count(&self) -> usize {
        self.ttl.len()
    }

    /// Arms a one-shot deletion timer and records it in the TTL table.
    pub(crate) fn schedule_expire(&self, key: &[u8], interval_ms: u64) {
        let store = Arc::clone(&self.store);
        let ttl = Arc::clone(&self.ttl);
        let owned = key.to_vec();
        let id = self.timers.schedule(
            interval_ms,
            1,
            Box::new(move || {
                // The TTL entry goes first, then the key; commands observe
                // the pair through the bucket lock either way.
                ttl.remove(&owned);
                store.delete(&owned);
            }),
        );
        self.ttl.set(key, id);
    }

    /// Writes a snapshot of the current keyspace to `dst`.
    pub fn save_snapshot(&self, dst: &Path) -> LkvResult<u64> {
        snapshot::save(&self.store, |key| self.expire_at_ms(key), dst)
    }

    /// Loads a snapshot into the keyspace; records already expired on disk
    /// are skipped, future expiries are re-armed.
    pub fn load_snapshot(&self, src: &Path) -> LkvResult<LoadStats> {
        snapshot::load(src, |record| {
            let now = now_ms();
            if let Some(at) = record.expire_at_ms {
                if at <= now {
                    return;
                }
            }
            match record.value {
                SnapshotValue::Int(n) => self.store.set_int(&record.key, n),
                SnapshotValue::Str(s) => self.store.set_str(&record.key, &s),
                SnapshotValue::List(items) => {
                    let _ = self.store.list_push(&record.key, &items, false);
                }
                SnapshotValue::Hash(pairs) => {
                    let _ = self.store.hash_set(&record.key, &pairs);
                }
                SnapshotValue::Set(members) => {
                    let _ = self.store.set_add(&record.key, &members);
                }
            }
            if let Some(at) = record.expire_at_ms {
                self.schedule_expire(&record.key, at - now);
            }
        })
    }
}
