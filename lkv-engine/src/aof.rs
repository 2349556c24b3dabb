//! # Append-Only Log
//!
//! Purpose: Persist mutating commands in wire framing so replaying the file
//! from byte zero rebuilds the keyspace.
//!
//! ## Design Principles
//! 1. **Double Buffering**: Writers push into the active buffer; when it
//!    fills the buffers swap under a short lock and the background flusher
//!    is signalled. Commands are acknowledged before they hit disk
//!    (everysec-style durability).
//! 2. **Drop Drains**: Shutdown stops the flusher, then both buffers are
//!    written out in order, oldest first.
//! 3. **Tolerant Replay**: A truncated tail (a crash mid-append) is
//!    discarded with a warning; everything before it is applied.
//! 4. **Offline Compaction**: `compact_log` folds each key's history into
//!    the minimal command sequence that produces the same final state.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::BytesMut;
use hashbrown::{HashMap, HashSet};
use parking_lot::{Condvar, Mutex};
use tracing::{info, warn};

use lkv_common::time::now_secs;
use lkv_common::{Command, LkvResult, RespParser};

/// Read chunk size during replay.
const REPLAY_READ_BUF_SIZE: usize = 64 * 1024;

struct Buffers {
    active: Vec<Command>,
    standby: Vec<Command>,
}

struct LogInner {
    path: PathBuf,
    capacity: usize,
    buffers: Mutex<Buffers>,
    cond: Condvar,
    auto_flush: AtomicBool,
    stopped: AtomicBool,
}

impl LogInner {
    /// Standby fill level that wakes the flusher.
    fn high_water(&self) -> usize {
        self.capacity * 4 / 5
    }

    fn write_batch(&self, batch: &[Command]) -> LkvResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        for cmd in batch {
            writer.write_all(&cmd.encode())?;
        }
        writer.flush()?;
        Ok(())
    }

    fn background_flush(&self) {
        loop {
            let batch = {
                let mut buffers = self.buffers.lock();
                self.cond.wait_while(&mut buffers, |b| {
                    !self.stopped.load(Ordering::Acquire)
                        && !(self.auto_flush.load(Ordering::Acquire)
                            && b.standby.len() >= self.high_water())
                });
                if self.stopped.load(Ordering::Acquire) {
                    return;
                }
                std::mem::take(&mut buffers.standby)
            };
            if let Err(err) = self.write_batch(&batch) {
                warn!(%err, "append-log flush failed; records stay lost");
            }
        }
    }
}

/// Double-buffered append log with a background flusher thread.
pub struct AppendLog {
    inner: Arc<LogInner>,
    worker: Option<JoinHandle<()>>,
}

impl AppendLog {
    /// Opens (or creates) the log at `path` and starts the flusher.
    pub fn open(path: impl Into<PathBuf>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let inner = Arc::new(LogInner {
            path: path.into(),
            capacity,
            buffers: Mutex::new(Buffers {
                active: Vec::with_capacity(capacity),
                standby: Vec::with_capacity(capacity),
            }),
            cond: Condvar::new(),
            auto_flush: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        });
        let worker_inner = Arc::clone(&inner);
        let worker = std::thread::spawn(move || worker_inner.background_flush());
        AppendLog {
            inner,
            worker: Some(worker),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Queues one record. Swaps buffers and wakes the flusher when the
    /// active buffer is full and the standby one has been drained.
    pub fn append(&self, cmd: &Command) {
        let mut buffers = self.inner.buffers.lock();
        if buffers.active.len() >= self.inner.capacity && buffers.standby.is_empty() {
            let buffers = &mut *buffers;
            std::mem::swap(&mut buffers.active, &mut buffers.standby);
            if self.inner.auto_flush.load(Ordering::Acquire) {
                self.inner.cond.notify_one();
            }
        }
        buffers.active.push(cmd.clone());
    }

    /// Toggles background flushing; re-enabling wakes the flusher.
    pub fn set_auto_flush(&self, on: bool) {
        self.inner.auto_flush.store(on, Ordering::Release);
        if on {
            self.inner.cond.notify_one();
        }
    }

    /// Synchronously writes out both buffers, oldest records first.
    pub fn flush(&self) -> LkvResult<()> {
        let (standby, active) = {
            let mut buffers = self.inner.buffers.lock();
            (
                std::mem::take(&mut buffers.standby),
                std::mem::take(&mut buffers.active),
            )
        };
        self.inner.write_batch(&standby)?;
        self.inner.write_batch(&active)?;
        Ok(())
    }

    /// Replays this log file through `apply`.
    pub fn replay(&self, apply: impl FnMut(Command)) -> LkvResult<u64> {
        Self::replay_path(&self.inner.path, apply)
    }

    /// Replays any log file through `apply`; a missing file is an empty log.
    ///
    /// Returns the number of records applied. A malformed or truncated tail
    /// stops the scan with a warning rather than an error.
    pub fn replay_path(path: &Path, mut apply: impl FnMut(Command)) -> LkvResult<u64> {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(_) => return Ok(0),
        };
        let mut parser = RespParser::new();
        let mut buf = BytesMut::with_capacity(REPLAY_READ_BUF_SIZE);
        let mut chunk = vec![0u8; REPLAY_READ_BUF_SIZE];
        let mut records = 0u64;
        loop {
            let n = file.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            loop {
                match parser.parse(&mut buf) {
                    Ok(Some(cmd)) => {
                        apply(cmd);
                        records += 1;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        warn!(
                            path = %path.display(),
                            discarded = buf.len(),
                            "malformed append-log record, discarding the rest"
                        );
                        return Ok(records);
                    }
                }
            }
        }
        if !buf.is_empty() {
            warn!(
                path = %path.display(),
                discarded = buf.len(),
                "truncated record at end of append log, discarded"
            );
        }
        info!(path = %path.display(), records, "append log replayed");
        Ok(records)
    }
}

impl Drop for AppendLog {
    fn drop(&mut self) {
        self.inner.stopped.store(true, Ordering::Release);
        self.inner.cond.notify_one();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        match self.flush() {
            Ok(()) => info!(path = %self.inner.path.display(), "append log saved on shutdown"),
            Err(err) => warn!(%err, "final append-log flush failed"),
        }
    }
}

/// Compaction result summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactStats {
    pub records_in: u64,
    pub records_out: u64,
    pub keys: usize,
}

/// Rewrites `src` into `dst`, folding each key's command history.
pub fn compact_log(src: &Path, dst: &Path) -> LkvResult<CompactStats> {
    let mut order: Vec<Vec<u8>> = Vec::new();
    let mut per_key: HashMap<Vec<u8>, Vec<Command>> = HashMap::new();
    let records_in = AppendLog::replay_path(src, |cmd| {
        if cmd.argv.len() < 2 {
            return;
        }
        let key = cmd.argv[1].clone();
        per_key
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(cmd);
    })?;

    let mut writer = BufWriter::new(File::create(dst)?);
    let mut records_out = 0u64;
    let keys = order.len();
    for key in &order {
        let history = per_key.remove(key.as_slice()).unwrap_or_default();
        for cmd in fold_key_history(history) {
            writer.write_all(&cmd.encode())?;
            records_out += 1;
        }
    }
    writer.flush()?;
    info!(records_in, records_out, keys, "append log compacted");
    Ok(CompactStats {
        records_in,
        records_out,
        keys,
    })
}

/// Folds one key's commands into the minimal equivalent sequence.
///
/// `del` and `set` discard everything before them; an `expireat` in the past
/// kills the key outright. List/hash/set mutations are simulated and
/// re-emitted as a single `rpush`/`hset`/`sadd`; any surviving `expireat`
/// trails the reconstruction so replay sets the timer on a live key.
fn fold_key_history(history: Vec<Command>) -> Vec<Command> {
    let now = now_secs();
    let mut seq: Vec<Command> = Vec::new();
    for cmd in history {
        match cmd.opcode().as_slice() {
            b"del" => seq.clear(),
            b"set" => {
                seq.clear();
                seq.push(cmd);
            }
            b"expireat" => {
                let deadline = cmd
                    .argv
                    .get(2)
                    .and_then(|raw| std::str::from_utf8(raw).ok())
                    .and_then(|text| text.parse::<u64>().ok());
                match deadline {
                    Some(at) if at > now => seq.push(cmd),
                    _ => seq.clear(),
                }
            }
            _ => seq.push(cmd),
        }
    }

    let mut out: Vec<Command> = Vec::new();
    let mut trailing_expire: Option<Command> = None;
    let mut list: std::collections::VecDeque<Vec<u8>> = Default::default();
    let mut hash: HashMap<Vec<u8>, Vec<u8>> = HashMap::new();
    let mut members: HashSet<Vec<u8>> = HashSet::new();
    let mut key: Option<Vec<u8>> = None;
    let (mut saw_list, mut saw_hash, mut saw_set) = (false, false, false);

    for cmd in seq {
        if key.is_none() {
            key = cmd.argv.get(1).cloned();
        }
        match cmd.opcode().as_slice() {
            b"lpush" => {
                saw_list = true;
                for value in &cmd.argv[2..] {
                    list.push_front(value.clone());
                }
            }
            b"rpush" => {
                saw_list = true;
                for value in &cmd.argv[2..] {
                    list.push_back(value.clone());
                }
            }
            b"lpop" => {
                list.pop_front();
            }
            b"rpop" => {
                list.pop_back();
            }
            b"lsetindex" => {
                let idx = cmd
                    .argv
                    .get(2)
                    .and_then(|raw| std::str::from_utf8(raw).ok())
                    .and_then(|text| text.parse::<usize>().ok());
                if let (Some(idx), Some(value)) = (idx, cmd.argv.get(3)) {
                    if idx < list.len() {
                        list[idx] = value.clone();
                    }
                }
            }
            b"hset" => {
                saw_hash = true;
                let mut pairs = cmd.argv[2..].chunks_exact(2);
                for pair in &mut pairs {
                    hash.insert(pair[0].clone(), pair[1].clone());
                }
            }
            b"hdel" => {
                for field in &cmd.argv[2..] {
                    hash.remove(field);
                }
            }
            b"sadd" => {
                saw_set = true;
                for member in &cmd.argv[2..] {
                    members.insert(member.clone());
                }
            }
            b"srem" => {
                for member in &cmd.argv[2..] {
                    members.remove(member);
                }
            }
            b"expireat" => trailing_expire = Some(cmd),
            _ => out.push(cmd),
        }
    }

    let key = match key {
        Some(key) => key,
        None => return out,
    };
    if saw_list && !list.is_empty() {
        let mut argv = vec![b"rpush".to_vec(), key.clone()];
        argv.extend(list);
        out.push(Command::new(argv));
    }
    if saw_hash && !hash.is_empty() {
        let mut argv = vec![b"hset".to_vec(), key.clone()];
        for (field, value) in hash {
            argv.push(field);
            argv.push(value);
        }
        out.push(Command::new(argv));
    }
    if saw_set && !members.is_empty() {
        let mut argv = vec![b"sadd".to_vec(), key.clone()];
        argv.extend(members);
        out.push(Command::new(argv));
    }
    if let Some(expire) = trailing_expire {
        out.push(expire);
    }
    out
}
