//! # Command Dispatcher
//!
//! Purpose: Resolve a parsed command to its handler, validate arity, run
//! the storage operation under the right bucket lock, mirror mutating
//! commands into the append log, and shape the reply frame.
//!
//! Sync-to-log policy: only state-changing verbs are logged, and `expire`
//! is rewritten to an absolute `expireat` record so replay is deterministic
//! against the wall clock.

use lkv_common::time::now_secs;
use lkv_common::{Command, LkvError, Reply};
use lkv_core::bytestr::parse_i64_bytes;

use crate::Engine;

/// Keys removed per memory-pressure eviction round.
const EVICTION_BATCH: usize = 16;

/// Reactor-side services the dispatcher needs for the pub/sub verbs.
///
/// Subscriptions belong to the session, not the keyspace, so the server
/// implements this and the engine stays transport-agnostic.
pub trait SessionHooks {
    /// Registers the session on `channel`; returns its channel count after.
    fn subscribe(&mut self, channel: &[u8]) -> usize;
    /// Removes the session from `channel`; returns its channel count after.
    fn unsubscribe(&mut self, channel: &[u8]) -> usize;
    /// Channels the session is currently subscribed to.
    fn channels(&self) -> Vec<Vec<u8>>;
    /// Relays `message` to every subscriber of `channel`; returns how many
    /// sessions received it.
    fn publish(&mut self, channel: &[u8], message: &[u8]) -> i64;
}

fn ok() -> Reply {
    Reply::Simple("OK")
}

fn error_reply(err: &LkvError) -> Reply {
    match err {
        LkvError::WrongType => Reply::Error(format!("WRONGTYPE {err}")),
        _ => Reply::Error(format!("ERROR {err}")),
    }
}

fn syntax_error(name: &str) -> Reply {
    Reply::Error(format!(
        "ERROR incorrect number of arguments for {name} command"
    ))
}

fn invalid_integer() -> Reply {
    error_reply(&LkvError::NotAnInteger)
}

/// `len(argv)` must equal `total`.
fn arity_exact(cmd: &Command, total: usize, name: &str) -> Result<(), Reply> {
    if cmd.argv.len() == total {
        Ok(())
    } else {
        Err(syntax_error(name))
    }
}

/// `len(argv)` must be at least `min_total`.
fn arity_at_least(cmd: &Command, min_total: usize, name: &str) -> Result<(), Reply> {
    if cmd.argv.len() >= min_total {
        Ok(())
    } else {
        Err(syntax_error(name))
    }
}

/// `len(argv)` must be at least `min_total` and even (field/value pairs).
fn arity_even(cmd: &Command, min_total: usize, name: &str) -> Result<(), Reply> {
    if cmd.argv.len() >= min_total && cmd.argv.len() % 2 == 0 {
        Ok(())
    } else {
        Err(syntax_error(name))
    }
}

fn bulk_array(items: Vec<Vec<u8>>) -> Reply {
    Reply::Array(items.into_iter().map(Reply::Bulk).collect())
}

impl Engine {
    /// Executes one command and returns its reply frame.
    ///
    /// `write_log` is false during replay so restored commands are not
    /// re-appended. `hooks` carries the session for the pub/sub verbs and
    /// is absent for replay and tooling.
    pub fn dispatch(
        &self,
        cmd: &Command,
        write_log: bool,
        hooks: Option<&mut dyn SessionHooks>,
    ) -> Reply {
        if cmd.argv.is_empty() {
            return error_reply(&LkvError::UnknownCommand);
        }
        if let Some(log) = &self.log {
            // Replay batches disk writes; live traffic flushes as it goes.
            log.set_auto_flush(write_log);
        }
        if write_log {
            self.maybe_evict();
        }

        match cmd.opcode().as_slice() {
            b"overview" => self.cmd_overview(cmd),
            b"total" => self.cmd_total(cmd),
            b"ping" => self.cmd_ping(cmd),
            b"evict" => self.cmd_evict(cmd, write_log),
            b"del" => self.cmd_del(cmd, write_log),
            b"exists" => self.cmd_exists(cmd),
            b"type" => self.cmd_type(cmd),
            b"expire" => self.cmd_expire(cmd, write_log),
            b"expireat" => self.cmd_expireat(cmd, write_log),
            b"ttl" => self.cmd_ttl(cmd),
            b"set" => self.cmd_set(cmd, write_log),
            b"get" => self.cmd_get(cmd),
            b"incr" => self.cmd_incr_decr(cmd, write_log, 1, false, "incr"),
            b"decr" => self.cmd_incr_decr(cmd, write_log, 1, true, "decr"),
            b"incrby" => self.cmd_incr_decr_by(cmd, write_log, false, "incrby"),
            b"decrby" => self.cmd_incr_decr_by(cmd, write_log, true, "decrby"),
            b"strlen" => self.cmd_strlen(cmd),
            b"append" => self.cmd_append(cmd, write_log),
            b"llen" => self.cmd_llen(cmd),
            b"lpop" => self.cmd_list_pop(cmd, write_log, true, "lpop"),
            b"rpop" => self.cmd_list_pop(cmd, write_log, false, "rpop"),
            b"lpush" => self.cmd_list_push(cmd, write_log, true, "lpush"),
            b"rpush" => self.cmd_list_push(cmd, write_log, false, "rpush"),
            b"lrange" => self.cmd_lrange(cmd),
            b"lsetindex" => self.cmd_lsetindex(cmd, write_log),
            b"lindex" => self.cmd_lindex(cmd),
            b"hset" => self.cmd_hset(cmd, write_log),
            b"hget" => self.cmd_hget(cmd),
            b"hdel" => self.cmd_hdel(cmd, write_log),
            b"hexists" => self.cmd_hexists(cmd),
            b"hgetall" => self.cmd_hgetall(cmd),
            b"hkeys" => self.cmd_hkeys(cmd),
            b"hvals" => self.cmd_hvals(cmd),
            b"hlen" => self.cmd_hlen(cmd),
            b"sadd" => self.cmd_sadd(cmd, write_log),
            b"sismember" => self.cmd_sismember(cmd),
            b"smismember" => self.cmd_smismember(cmd),
            b"smembers" => self.cmd_smembers(cmd),
            b"srem" => self.cmd_srem(cmd, write_log),
            b"scard" => self.cmd_scard(cmd),
            b"publish" => self.cmd_publish(cmd, hooks),
            b"subscribe" => self.cmd_subscribe(cmd, hooks),
            b"unsubscribe" => self.cmd_unsubscribe(cmd, hooks),
            // Reserved verbs, parsed but not implemented yet.
            b"getrange" | b"setrange" | b"linsert" | b"lrem" | b"spop" => {
                error_reply(&LkvError::NotSupported)
            }
            _ => error_reply(&LkvError::UnknownCommand),
        }
    }

    fn log_record(&self, write_log: bool, cmd: &Command) {
        if write_log {
            if let Some(log) = &self.log {
                log.append(cmd);
            }
        }
    }

    fn log_argv(&self, write_log: bool, argv: Vec<Vec<u8>>) {
        self.log_record(write_log, &Command::new(argv));
    }

    /// Evicts a batch when the sampled resident size crosses the trigger
    /// threshold, and mirrors the deletions into the log.
    fn maybe_evict(&self) {
        let sampler = match &self.sampler {
            Some(sampler) => sampler,
            None => return,
        };
        if self.config.maxmem_mb == 0 {
            return;
        }
        let rss_kb = sampler.rss_kb();
        let limit_kb = (self.config.maxmem_mb * 1024) as f64 * self.config.lru_trigger_ratio;
        if (rss_kb as f64) <= limit_kb {
            return;
        }
        let deleted = self.store.evict(self.policy, EVICTION_BATCH);
        if deleted.is_empty() {
            return;
        }
        tracing::info!(
            rss_kb,
            evicted = deleted.len(),
            policy = ?self.policy,
            "memory pressure eviction"
        );
        let mut argv = vec![b"del".to_vec()];
        argv.extend(deleted);
        self.log_argv(true, argv);
    }

    // ---- generic verbs ----------------------------------------------------

    fn cmd_overview(&self, cmd: &Command) -> Reply {
        if let Err(reply) = arity_exact(cmd, 1, "overview") {
            return reply;
        }
        let view = self.store.overview();
        let pairs: [(&str, u64); 8] = [
            ("Number of int:", view.n_int),
            ("Number of string:", view.n_str),
            ("Number of list:", view.n_list),
            ("Number of elements in list:", view.n_list_elems),
            ("Number of hash:", view.n_hash),
            ("Number of elements in hash:", view.n_hash_entries),
            ("Number of set:", view.n_set),
            ("Number of elements in set:", view.n_set_members),
        ];
        let mut items = Vec::with_capacity(pairs.len() * 2);
        for (label, count) in pairs {
            items.push(Reply::bulk(label));
            items.push(Reply::bulk(count.to_string()));
        }
        Reply::Array(items)
    }

    fn cmd_total(&self, cmd: &Command) -> Reply {
        if let Err(reply) = arity_exact(cmd, 1, "total") {
            return reply;
        }
        Reply::Integer(self.store.num_items() as i64)
    }

    fn cmd_ping(&self, cmd: &Command) -> Reply {
        if let Err(reply) = arity_exact(cmd, 1, "ping") {
            return reply;
        }
        Reply::Simple("PONG")
    }

    fn cmd_evict(&self, cmd: &Command, write_log: bool) -> Reply {
        if let Err(reply) = arity_exact(cmd, 2, "evict") {
            return reply;
        }
        let count = match parse_i64_bytes(&cmd.argv[1]) {
            Ok(n) if n >= 0 => n as usize,
            _ => return invalid_integer(),
        };
        let deleted = self.store.evict(self.policy, count);
        let evicted = deleted.len();
        if write_log && !deleted.is_empty() {
            let mut argv = vec![b"del".to_vec()];
            argv.extend(deleted);
            self.log_argv(true, argv);
        }
        Reply::Integer(evicted as i64)
    }

    fn cmd_del(&self, cmd: &Command, write_log: bool) -> Reply {
        if let Err(reply) = arity_at_least(cmd, 2, "del") {
            return reply;
        }
        let removed = self.store.delete_many(&cmd.argv[1..]);
        self.log_record(write_log, cmd);
        Reply::Integer(removed as i64)
    }

    fn cmd_exists(&self, cmd: &Command) -> Reply {
        if let Err(reply) = arity_at_least(cmd, 2, "exists") {
            return reply;
        }
        Reply::Integer(self.store.exists_count(&cmd.argv[1..]) as i64)
    }

    fn cmd_type(&self, cmd: &Command) -> Reply {
        if let Err(reply) = arity_exact(cmd, 2, "type") {
            return reply;
        }
        match self.store.type_of(&cmd.argv[1]) {
            Some(name) => Reply::Simple(name),
            None => Reply::Simple("none"),
        }
    }

    // ---- expiration -------------------------------------------------------

    /// Applies a relative expiry; false means the timer bookkeeping failed.
    fn apply_expire(&self, key: &[u8], interval_secs: i64) -> bool {
        match self.ttl.timer_of(key) {
            None => {
                if interval_secs > 0 {
                    self.schedule_expire(key, interval_secs as u64 * 1000);
                } else if interval_secs == 0 {
                    // Zero means delete right now, not schedule.
                    self.store.delete(key);
                }
                true
            }
            Some(id) => {
                if interval_secs >= 0 {
                    self.timers.update(id, interval_secs as u64 * 1000, 1)
                } else {
                    // Negative interval clears the expiry, keeps the key.
                    if !self.timers.cancel(id) {
                        return false;
                    }
                    self.ttl.remove(key);
                    true
                }
            }
        }
    }

    fn cmd_expire(&self, cmd: &Command, write_log: bool) -> Reply {
        if let Err(reply) = arity_exact(cmd, 3, "expire") {
            return reply;
        }
        let key = &cmd.argv[1];
        if !self.store.exists(key) {
            return Reply::Integer(0);
        }
        let interval = match parse_i64_bytes(&cmd.argv[2]) {
            Ok(interval) => interval,
            Err(_) => return invalid_integer(),
        };
        if !self.apply_expire(key, interval) {
            return Reply::Integer(0);
        }
        if write_log {
            if interval >= 0 {
                // Rewrite to the absolute form so replay does not restart
                // the countdown from load time.
                let deadline = now_secs() + interval as u64;
                self.log_argv(
                    true,
                    vec![
                        b"expireat".to_vec(),
                        key.clone(),
                        deadline.to_string().into_bytes(),
                    ],
                );
            } else if let Some(argv) = self.store.recover_command(key) {
                // Clearing a TTL re-logs the key's value, so replay
                // materialises it without the old expiry.
                self.log_argv(true, argv);
            }
        }
        Reply::Integer(1)
    }

    fn cmd_expireat(&self, cmd: &Command, write_log: bool) -> Reply {
        if let Err(reply) = arity_exact(cmd, 3, "expireat") {
            return reply;
        }
        let key = &cmd.argv[1];
        if !self.store.exists(key) {
            return Reply::Integer(0);
        }
        let unix_sec = match parse_i64_bytes(&cmd.argv[2]) {
            Ok(at) => at,
            Err(_) => return invalid_integer(),
        };
        let interval = (unix_sec - now_secs() as i64).max(0);
        if !self.apply_expire(key, interval) {
            return Reply::Integer(0);
        }
        self.log_record(write_log, cmd);
        Reply::Integer(1)
    }

    fn cmd_ttl(&self, cmd: &Command) -> Reply {
        if let Err(reply) = arity_exact(cmd, 2, "ttl") {
            return reply;
        }
        let key = &cmd.argv[1];
        if !self.store.exists(key) {
            return Reply::Integer(-2);
        }
        let remaining = self
            .ttl
            .timer_of(key)
            .and_then(|id| self.timers.fire_at(id))
            .map(|when| when.saturating_sub(lkv_common::time::now_ms()) / 1000);
        match remaining {
            Some(secs) => Reply::Integer(secs as i64),
            None => Reply::Integer(-1),
        }
    }

    // ---- int / string -----------------------------------------------------

    fn cmd_set(&self, cmd: &Command, write_log: bool) -> Reply {
        if let Err(reply) = arity_exact(cmd, 3, "set") {
            return reply;
        }
        let key = &cmd.argv[1];
        // Integer-looking literals are stored inline as 64-bit ints.
        match parse_i64_bytes(&cmd.argv[2]) {
            Ok(value) => self.store.set_int(key, value),
            Err(_) => self.store.set_str(key, &cmd.argv[2]),
        }
        self.log_record(write_log, cmd);
        ok()
    }

    fn cmd_get(&self, cmd: &Command) -> Reply {
        if let Err(reply) = arity_exact(cmd, 2, "get") {
            return reply;
        }
        match self.store.get_scalar(&cmd.argv[1]) {
            Ok(value) => Reply::Bulk(value.into_bytes()),
            Err(LkvError::NotFound) => Reply::Nil,
            Err(err) => error_reply(&err),
        }
    }

    fn cmd_incr_decr(
        &self,
        cmd: &Command,
        write_log: bool,
        delta: i64,
        negate: bool,
        name: &str,
    ) -> Reply {
        if let Err(reply) = arity_exact(cmd, 2, name) {
            return reply;
        }
        let result = if negate {
            self.store.decr_by(&cmd.argv[1], delta)
        } else {
            self.store.incr_by(&cmd.argv[1], delta)
        };
        match result {
            Ok(value) => {
                self.log_record(write_log, cmd);
                Reply::Integer(value)
            }
            Err(err) => error_reply(&err),
        }
    }

    fn cmd_incr_decr_by(
        &self,
        cmd: &Command,
        write_log: bool,
        negate: bool,
        name: &str,
    ) -> Reply {
        if let Err(reply) = arity_exact(cmd, 3, name) {
            return reply;
        }
        let delta = match parse_i64_bytes(&cmd.argv[2]) {
            Ok(delta) if delta >= 0 => delta,
            // Negative operands are rejected, not routed to the mirror verb.
            _ => return invalid_integer(),
        };
        let result = if negate {
            self.store.decr_by(&cmd.argv[1], delta)
        } else {
            self.store.incr_by(&cmd.argv[1], delta)
        };
        match result {
            Ok(value) => {
                self.log_record(write_log, cmd);
                Reply::Integer(value)
            }
            Err(err) => error_reply(&err),
        }
    }

    fn cmd_strlen(&self, cmd: &Command) -> Reply {
        if let Err(reply) = arity_exact(cmd, 2, "strlen") {
            return reply;
        }
        match self.store.strlen(&cmd.argv[1]) {
            Ok(len) => Reply::Integer(len as i64),
            Err(LkvError::NotFound) => Reply::Integer(0),
            Err(err) => error_reply(&err),
        }
    }

    fn cmd_append(&self, cmd: &Command, write_log: bool) -> Reply {
        if let Err(reply) = arity_exact(cmd, 3, "append") {
            return reply;
        }
        match self.store.append(&cmd.argv[1], &cmd.argv[2]) {
            Ok(len) => {
                self.log_record(write_log, cmd);
                Reply::Integer(len as i64)
            }
            Err(LkvError::NotFound) => Reply::Nil,
            Err(err) => error_reply(&err),
        }
    }

    // ---- list -------------------------------------------------------------

    fn cmd_llen(&self, cmd: &Command) -> Reply {
        if let Err(reply) = arity_exact(cmd, 2, "llen") {
            return reply;
        }
        match self.store.list_len(&cmd.argv[1]) {
            Ok(len) => Reply::Integer(len as i64),
            Err(LkvError::NotFound) => Reply::Integer(0),
            Err(err) => error_reply(&err),
        }
    }

    fn cmd_list_pop(&self, cmd: &Command, write_log: bool, left: bool, name: &str) -> Reply {
        if let Err(reply) = arity_exact(cmd, 2, name) {
            return reply;
        }
        match self.store.list_pop(&cmd.argv[1], left) {
            Ok(Some(value)) => {
                self.log_record(write_log, cmd);
                Reply::Bulk(value)
            }
            Ok(None) | Err(LkvError::NotFound) => Reply::Nil,
            Err(err) => error_reply(&err),
        }
    }

    fn cmd_list_push(&self, cmd: &Command, write_log: bool, left: bool, name: &str) -> Reply {
        if let Err(reply) = arity_at_least(cmd, 3, name) {
            return reply;
        }
        match self.store.list_push(&cmd.argv[1], &cmd.argv[2..], left) {
            Ok(len) => {
                self.log_record(write_log, cmd);
                Reply::Integer(len as i64)
            }
            Err(err) => error_reply(&err),
        }
    }

    fn cmd_lrange(&self, cmd: &Command) -> Reply {
        if let Err(reply) = arity_exact(cmd, 4, "lrange") {
            return reply;
        }
        let begin = match parse_i64_bytes(&cmd.argv[2]) {
            Ok(idx) => idx,
            Err(_) => return invalid_integer(),
        };
        let end = match parse_i64_bytes(&cmd.argv[3]) {
            Ok(idx) => idx,
            Err(_) => return invalid_integer(),
        };
        match self.store.list_range(&cmd.argv[1], begin, end) {
            Ok(values) => bulk_array(values),
            Err(LkvError::NotFound) => Reply::Array(Vec::new()),
            Err(err) => error_reply(&err),
        }
    }

    fn cmd_lsetindex(&self, cmd: &Command, write_log: bool) -> Reply {
        if let Err(reply) = arity_exact(cmd, 4, "lsetindex") {
            return reply;
        }
        let idx = match parse_i64_bytes(&cmd.argv[2]) {
            Ok(idx) => idx,
            Err(_) => return invalid_integer(),
        };
        match self.store.list_set(&cmd.argv[1], idx, &cmd.argv[3]) {
            Ok(()) => {
                self.log_record(write_log, cmd);
                ok()
            }
            Err(err) => error_reply(&err),
        }
    }

    fn cmd_lindex(&self, cmd: &Command) -> Reply {
        if let Err(reply) = arity_exact(cmd, 3, "lindex") {
            return reply;
        }
        let idx = match parse_i64_bytes(&cmd.argv[2]) {
            Ok(idx) => idx,
            Err(_) => return invalid_integer(),
        };
        match self.store.list_index(&cmd.argv[1], idx) {
            Ok(Some(value)) => Reply::Bulk(value),
            // Out-of-range reads degrade to nil, only writes error.
            Ok(None) | Err(LkvError::NotFound) => Reply::Nil,
            Err(err) => error_reply(&err),
        }
    }

    // ---- hash -------------------------------------------------------------

    fn cmd_hset(&self, cmd: &Command, write_log: bool) -> Reply {
        if let Err(reply) = arity_even(cmd, 4, "hset") {
            return reply;
        }
        let pairs: Vec<(Vec<u8>, Vec<u8>)> = cmd.argv[2..]
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();
        match self.store.hash_set(&cmd.argv[1], &pairs) {
            Ok(written) if written > 0 => {
                self.log_record(write_log, cmd);
                ok()
            }
            Ok(_) => error_reply(&LkvError::Internal),
            Err(err) => error_reply(&err),
        }
    }

    fn cmd_hget(&self, cmd: &Command) -> Reply {
        if let Err(reply) = arity_at_least(cmd, 3, "hget") {
            return reply;
        }
        let key = &cmd.argv[1];
        if cmd.argv.len() == 3 {
            return match self.store.hash_get(key, &cmd.argv[2]) {
                Ok(Some(value)) => Reply::Bulk(value),
                Ok(None) | Err(LkvError::NotFound) => Reply::Nil,
                Err(err) => error_reply(&err),
            };
        }
        let fields = &cmd.argv[2..];
        match self.store.hash_get_multi(key, fields) {
            Ok(values) => Reply::Array(
                values
                    .into_iter()
                    .map(|value| value.map(Reply::Bulk).unwrap_or(Reply::Nil))
                    .collect(),
            ),
            Err(LkvError::NotFound) => {
                Reply::Array(fields.iter().map(|_| Reply::Nil).collect())
            }
            Err(err) => error_reply(&err),
        }
    }

    fn cmd_hdel(&self, cmd: &Command, write_log: bool) -> Reply {
        if let Err(reply) = arity_at_least(cmd, 3, "hdel") {
            return reply;
        }
        match self.store.hash_del(&cmd.argv[1], &cmd.argv[2..]) {
            Ok(erased) => {
                self.log_record(write_log, cmd);
                Reply::Integer(erased as i64)
            }
            Err(LkvError::NotFound) => Reply::Integer(0),
            Err(err) => error_reply(&err),
        }
    }

    fn cmd_hexists(&self, cmd: &Command) -> Reply {
        if let Err(reply) = arity_exact(cmd, 3, "hexists") {
            return reply;
        }
        match self.store.hash_exists(&cmd.argv[1], &cmd.argv[2]) {
            Ok(present) => Reply::Integer(present as i64),
            Err(LkvError::NotFound) => Reply::Integer(0),
            Err(err) => error_reply(&err),
        }
    }

    fn cmd_hgetall(&self, cmd: &Command) -> Reply {
        if let Err(reply) = arity_exact(cmd, 2, "hgetall") {
            return reply;
        }
        match self.store.hash_entries(&cmd.argv[1]) {
            Ok(flat) => bulk_array(flat),
            Err(LkvError::NotFound) => Reply::Array(Vec::new()),
            Err(err) => error_reply(&err),
        }
    }

    fn cmd_hkeys(&self, cmd: &Command) -> Reply {
        if let Err(reply) = arity_exact(cmd, 2, "hkeys") {
            return reply;
        }
        match self.store.hash_keys(&cmd.argv[1]) {
            Ok(fields) => bulk_array(fields),
            Err(LkvError::NotFound) => Reply::Array(Vec::new()),
            Err(err) => error_reply(&err),
        }
    }

    fn cmd_hvals(&self, cmd: &Command) -> Reply {
        if let Err(reply) = arity_exact(cmd, 2, "hvals") {
            return reply;
        }
        match self.store.hash_vals(&cmd.argv[1]) {
            Ok(values) => bulk_array(values),
            Err(LkvError::NotFound) => Reply::Array(Vec::new()),
            Err(err) => error_reply(&err),
        }
    }

    fn cmd_hlen(&self, cmd: &Command) -> Reply {
        if let Err(reply) = arity_exact(cmd, 2, "hlen") {
            return reply;
        }
        match self.store.hash_len(&cmd.argv[1]) {
            Ok(len) => Reply::Integer(len as i64),
            Err(LkvError::NotFound) => Reply::Integer(0),
            Err(err) => error_reply(&err),
        }
    }

    // ---- set --------------------------------------------------------------

    fn cmd_sadd(&self, cmd: &Command, write_log: bool) -> Reply {
        if let Err(reply) = arity_at_least(cmd, 3, "sadd") {
            return reply;
        }
        match self.store.set_add(&cmd.argv[1], &cmd.argv[2..]) {
            Ok(added) => {
                self.log_record(write_log, cmd);
                Reply::Integer(added as i64)
            }
            Err(err) => error_reply(&err),
        }
    }

    fn cmd_sismember(&self, cmd: &Command) -> Reply {
        if let Err(reply) = arity_exact(cmd, 3, "sismember") {
            return reply;
        }
        match self.store.set_is_member(&cmd.argv[1], &cmd.argv[2]) {
            Ok(present) => Reply::Integer(present as i64),
            Err(LkvError::NotFound) => Reply::Integer(0),
            Err(err) => error_reply(&err),
        }
    }

    fn cmd_smismember(&self, cmd: &Command) -> Reply {
        if let Err(reply) = arity_at_least(cmd, 3, "smismember") {
            return reply;
        }
        let members = &cmd.argv[2..];
        match self.store.set_mis_member(&cmd.argv[1], members) {
            Ok(hits) => Reply::Array(
                hits.into_iter()
                    .map(|hit| Reply::Integer(hit as i64))
                    .collect(),
            ),
            Err(LkvError::NotFound) => Reply::Array(
                members.iter().map(|_| Reply::Integer(0)).collect(),
            ),
            Err(err) => error_reply(&err),
        }
    }

    fn cmd_smembers(&self, cmd: &Command) -> Reply {
        if let Err(reply) = arity_exact(cmd, 2, "smembers") {
            return reply;
        }
        match self.store.set_members(&cmd.argv[1]) {
            Ok(members) => bulk_array(members),
            Err(LkvError::NotFound) => Reply::Array(Vec::new()),
            Err(err) => error_reply(&err),
        }
    }

    fn cmd_srem(&self, cmd: &Command, write_log: bool) -> Reply {
        if let Err(reply) = arity_at_least(cmd, 3, "srem") {
            return reply;
        }
        match self.store.set_remove(&cmd.argv[1], &cmd.argv[2..]) {
            Ok(removed) => {
                self.log_record(write_log, cmd);
                Reply::Integer(removed as i64)
            }
            Err(LkvError::NotFound) => Reply::Integer(0),
            Err(err) => error_reply(&err),
        }
    }

    fn cmd_scard(&self, cmd: &Command) -> Reply {
        if let Err(reply) = arity_exact(cmd, 2, "scard") {
            return reply;
        }
        match self.store.set_card(&cmd.argv[1]) {
            Ok(card) => Reply::Integer(card as i64),
            Err(LkvError::NotFound) => Reply::Integer(0),
            Err(err) => error_reply(&err),
        }
    }

    // ---- pub/sub ----------------------------------------------------------

    fn cmd_publish(&self, cmd: &Command, hooks: Option<&mut dyn SessionHooks>) -> Reply {
        if let Err(reply) = arity_exact(cmd, 3, "publish") {
            return reply;
        }
        match hooks {
            Some(hooks) => Reply::Integer(hooks.publish(&cmd.argv[1], &cmd.argv[2])),
            None => Reply::Integer(0),
        }
    }

    fn cmd_subscribe(&self, cmd: &Command, hooks: Option<&mut dyn SessionHooks>) -> Reply {
        if let Err(reply) = arity_at_least(cmd, 2, "subscribe") {
            return reply;
        }
        let hooks = match hooks {
            Some(hooks) => hooks,
            None => return error_reply(&LkvError::Internal),
        };
        let mut frames = Vec::with_capacity(cmd.argv.len() - 1);
        for channel in &cmd.argv[1..] {
            let count = hooks.subscribe(channel);
            frames.push(Reply::Array(vec![
                Reply::bulk("subscribe"),
                Reply::Bulk(channel.clone()),
                Reply::Integer(count as i64),
            ]));
        }
        Reply::Multi(frames)
    }

    fn cmd_unsubscribe(&self, cmd: &Command, hooks: Option<&mut dyn SessionHooks>) -> Reply {
        if cmd.argv.is_empty() {
            return syntax_error("unsubscribe");
        }
        let hooks = match hooks {
            Some(hooks) => hooks,
            None => return error_reply(&LkvError::Internal),
        };
        // Bare `unsubscribe` drops every channel the session holds.
        let channels: Vec<Vec<u8>> = if cmd.argv.len() >= 2 {
            cmd.argv[1..].to_vec()
        } else {
            hooks.channels()
        };
        if channels.is_empty() {
            return Reply::Multi(vec![Reply::Array(vec![
                Reply::bulk("unsubscribe"),
                Reply::Nil,
                Reply::Integer(0),
            ])]);
        }
        let mut frames = Vec::with_capacity(channels.len());
        for channel in channels {
            let count = hooks.unsubscribe(&channel);
            frames.push(Reply::Array(vec![
                Reply::bulk("unsubscribe"),
                Reply::Bulk(channel),
                Reply::Integer(count as i64),
            ]));
        }
        Reply::Multi(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lkv_common::Config;

    fn engine() -> Engine {
        Engine::in_memory(Config::default())
    }

    fn exec(engine: &Engine, args: &[&str]) -> Vec<u8> {
        engine.dispatch(&Command::from_args(args), true, None).encode()
    }

    #[test]
    fn int_roundtrip_scenario() {
        let engine = engine();
        assert_eq!(exec(&engine, &["set", "counter", "100"]), b"+OK\r\n");
        assert_eq!(exec(&engine, &["incrby", "counter", "23"]), b":123\r\n");
        assert_eq!(exec(&engine, &["type", "counter"]), b"+int\r\n");
        assert_eq!(exec(&engine, &["get", "counter"]), b"$3\r\n123\r\n");
    }

    #[test]
    fn list_push_range_scenario() {
        let engine = engine();
        assert_eq!(exec(&engine, &["rpush", "L", "a", "b", "c", "d"]), b":4\r\n");
        assert_eq!(exec(&engine, &["lpop", "L"]), b"$1\r\na\r\n");
        assert_eq!(
            exec(&engine, &["lrange", "L", "0", "-1"]),
            b"*3\r\n$1\r\nb\r\n$1\r\nc\r\n$1\r\nd\r\n"
        );
        assert_eq!(
            exec(&engine, &["lrange", "L", "-2", "-1"]),
            b"*2\r\n$1\r\nc\r\n$1\r\nd\r\n"
        );
    }

    #[test]
    fn hash_scenario() {
        let engine = engine();
        assert_eq!(exec(&engine, &["hset", "H", "a", "1", "b", "2"]), b"+OK\r\n");
        assert_eq!(exec(&engine, &["hget", "H", "a"]), b"$1\r\n1\r\n");
        assert_eq!(exec(&engine, &["hdel", "H", "b"]), b":1\r\n");
        assert_eq!(exec(&engine, &["hlen", "H"]), b":1\r\n");
    }

    #[test]
    fn wrong_type_scenario() {
        let engine = engine();
        assert_eq!(exec(&engine, &["set", "K", "hello"]), b"+OK\r\n");
        assert_eq!(
            exec(&engine, &["lpush", "K", "x"]),
            b"-WRONGTYPE operation to a key holding wrong type of value\r\n"
        );
        assert_eq!(
            exec(&engine, &["hset", "K", "f", "v"]),
            b"-WRONGTYPE operation to a key holding wrong type of value\r\n"
        );
    }

    #[test]
    fn set_value_scenario() {
        let engine = engine();
        assert_eq!(exec(&engine, &["sadd", "T", "x", "y", "x"]), b":2\r\n");
        assert_eq!(exec(&engine, &["sismember", "T", "x"]), b":1\r\n");
        assert_eq!(exec(&engine, &["scard", "T"]), b":2\r\n");
        assert_eq!(
            exec(&engine, &["smismember", "T", "x", "zz"]),
            b"*2\r\n:1\r\n:0\r\n"
        );
        assert_eq!(exec(&engine, &["srem", "T", "y"]), b":1\r\n");
        assert_eq!(exec(&engine, &["scard", "T"]), b":1\r\n");
    }

    #[test]
    fn type_and_exists_and_del() {
        let engine = engine();
        exec(&engine, &["set", "a", "1"]);
        exec(&engine, &["rpush", "l", "x"]);
        assert_eq!(exec(&engine, &["type", "a"]), b"+int\r\n");
        assert_eq!(exec(&engine, &["type", "l"]), b"+list\r\n");
        assert_eq!(exec(&engine, &["type", "none-such"]), b"+none\r\n");
        assert_eq!(exec(&engine, &["exists", "a", "l", "nope"]), b":2\r\n");
        assert_eq!(exec(&engine, &["del", "a", "l", "nope"]), b":2\r\n");
        assert_eq!(exec(&engine, &["exists", "a"]), b":0\r\n");
    }

    #[test]
    fn arithmetic_edge_cases() {
        let engine = engine();
        assert_eq!(exec(&engine, &["incr", "c"]), b":1\r\n");
        assert_eq!(exec(&engine, &["decr", "c"]), b":0\r\n");
        assert_eq!(
            exec(&engine, &["incrby", "c", "-5"]),
            b"-ERROR index or value is not an integer\r\n"
        );
        assert_eq!(
            exec(&engine, &["incrby", "c", "abc"]),
            b"-ERROR index or value is not an integer\r\n"
        );
        exec(&engine, &["set", "big", "9223372036854775807"]);
        assert_eq!(
            exec(&engine, &["incrby", "big", "1"]),
            b"-ERROR integer overflow\r\n"
        );
        exec(&engine, &["set", "small", "-9223372036854775808"]);
        assert_eq!(
            exec(&engine, &["decrby", "small", "1"]),
            b"-ERROR integer overflow\r\n"
        );
    }

    #[test]
    fn string_verbs() {
        let engine = engine();
        exec(&engine, &["set", "s", "hello"]);
        assert_eq!(exec(&engine, &["strlen", "s"]), b":5\r\n");
        assert_eq!(exec(&engine, &["append", "s", "!"]), b":6\r\n");
        assert_eq!(exec(&engine, &["get", "s"]), b"$6\r\nhello!\r\n");
        assert_eq!(exec(&engine, &["strlen", "missing"]), b":0\r\n");
        assert_eq!(exec(&engine, &["append", "missing", "x"]), b"$-1\r\n");
        // Appending onto an int promotes it.
        exec(&engine, &["set", "n", "12"]);
        assert_eq!(exec(&engine, &["append", "n", "ab"]), b":4\r\n");
        assert_eq!(exec(&engine, &["type", "n"]), b"+string\r\n");
    }

    #[test]
    fn list_index_verbs() {
        let engine = engine();
        exec(&engine, &["rpush", "L", "a", "b", "c"]);
        assert_eq!(exec(&engine, &["lindex", "L", "0"]), b"$1\r\na\r\n");
        assert_eq!(exec(&engine, &["lindex", "L", "-1"]), b"$1\r\nc\r\n");
        assert_eq!(exec(&engine, &["lindex", "L", "9"]), b"$-1\r\n");
        assert_eq!(exec(&engine, &["lsetindex", "L", "1", "B"]), b"+OK\r\n");
        assert_eq!(exec(&engine, &["lindex", "L", "1"]), b"$1\r\nB\r\n");
        assert_eq!(
            exec(&engine, &["lsetindex", "L", "9", "x"]),
            b"-ERROR index out of range\r\n"
        );
        assert_eq!(
            exec(&engine, &["lsetindex", "missing", "0", "x"]),
            b"-ERROR no such key\r\n"
        );
    }

    #[test]
    fn unknown_and_unsupported_commands() {
        let engine = engine();
        assert_eq!(
            exec(&engine, &["flushall"]),
            b"-ERROR unsupported command\r\n"
        );
        assert_eq!(
            exec(&engine, &["getrange", "k", "0", "1"]),
            b"-ERROR command not supported yet\r\n"
        );
        assert_eq!(
            exec(&engine, &["spop", "s"]),
            b"-ERROR command not supported yet\r\n"
        );
    }

    #[test]
    fn arity_violations() {
        let engine = engine();
        assert_eq!(
            exec(&engine, &["set", "k"]),
            b"-ERROR incorrect number of arguments for set command\r\n"
        );
        assert_eq!(
            exec(&engine, &["hset", "H", "f1", "v1", "f2"]),
            b"-ERROR incorrect number of arguments for hset command\r\n"
        );
        assert_eq!(
            exec(&engine, &["ping", "x"]),
            b"-ERROR incorrect number of arguments for ping command\r\n"
        );
        assert_eq!(
            exec(&engine, &["lrange", "L", "0"]),
            b"-ERROR incorrect number of arguments for lrange command\r\n"
        );
    }

    #[test]
    fn verbs_are_case_insensitive() {
        let engine = engine();
        assert_eq!(exec(&engine, &["SET", "k", "1"]), b"+OK\r\n");
        assert_eq!(exec(&engine, &["GeT", "k"]), b"$1\r\n1\r\n");
        assert_eq!(exec(&engine, &["PING"]), b"+PONG\r\n");
    }

    #[test]
    fn expire_and_ttl_replies() {
        let engine = engine();
        assert_eq!(exec(&engine, &["ttl", "missing"]), b":-2\r\n");
        exec(&engine, &["set", "k", "1"]);
        assert_eq!(exec(&engine, &["ttl", "k"]), b":-1\r\n");
        assert_eq!(exec(&engine, &["expire", "k", "100"]), b":1\r\n");
        let reply = exec(&engine, &["ttl", "k"]);
        // 99 or 100 depending on the millisecond boundary.
        assert!(reply == b":100\r\n".to_vec() || reply == b":99\r\n".to_vec());
        assert_eq!(exec(&engine, &["expire", "missing", "10"]), b":0\r\n");
        assert_eq!(
            exec(&engine, &["expire", "k", "oops"]),
            b"-ERROR index or value is not an integer\r\n"
        );
    }

    #[test]
    fn expire_zero_deletes_immediately() {
        let engine = engine();
        exec(&engine, &["set", "gone", "1"]);
        assert_eq!(exec(&engine, &["expire", "gone", "0"]), b":1\r\n");
        assert_eq!(exec(&engine, &["exists", "gone"]), b":0\r\n");
    }

    #[test]
    fn negative_expire_clears_ttl_but_keeps_key() {
        let engine = engine();
        exec(&engine, &["set", "k", "1"]);
        exec(&engine, &["expire", "k", "100"]);
        assert_eq!(exec(&engine, &["expire", "k", "-1"]), b":1\r\n");
        assert_eq!(exec(&engine, &["ttl", "k"]), b":-1\r\n");
        assert_eq!(exec(&engine, &["exists", "k"]), b":1\r\n");
    }

    #[test]
    fn overview_and_total() {
        let engine = engine();
        exec(&engine, &["set", "a", "1"]);
        exec(&engine, &["rpush", "L", "x", "y"]);
        assert_eq!(exec(&engine, &["total"]), b":2\r\n");
        let reply = engine.dispatch(&Command::from_args(&["overview"]), true, None);
        match reply {
            Reply::Array(items) => assert_eq!(items.len(), 16),
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn hget_multi_fills_missing_fields_with_nil() {
        let engine = engine();
        exec(&engine, &["hset", "H", "a", "1"]);
        assert_eq!(
            exec(&engine, &["hget", "H", "a", "zz"]),
            b"*2\r\n$1\r\n1\r\n$-1\r\n"
        );
        assert_eq!(
            exec(&engine, &["hget", "missing", "a", "b"]),
            b"*2\r\n$-1\r\n$-1\r\n"
        );
    }

    #[test]
    fn reads_never_log_writes_do() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.dumpfile = dir
            .path()
            .join("dump.aof")
            .to_string_lossy()
            .into_owned();
        let log_path = std::path::PathBuf::from(config.dumpfile.clone());
        {
            let engine = Engine::new(config);
            exec(&engine, &["set", "k", "1"]);
            exec(&engine, &["get", "k"]);
            exec(&engine, &["exists", "k"]);
            exec(&engine, &["incrby", "k", "4"]);
            exec(&engine, &["lrange", "nope", "0", "-1"]);
        }
        let mut verbs = Vec::new();
        crate::aof::AppendLog::replay_path(&log_path, |cmd| {
            verbs.push(String::from_utf8_lossy(&cmd.opcode()).into_owned());
        })
        .unwrap();
        assert_eq!(verbs, vec!["set", "incrby"]);
    }

    #[test]
    fn expire_is_logged_as_absolute_expireat() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.dumpfile = dir
            .path()
            .join("dump.aof")
            .to_string_lossy()
            .into_owned();
        let log_path = std::path::PathBuf::from(config.dumpfile.clone());
        let before = now_secs();
        {
            let engine = Engine::new(config);
            exec(&engine, &["set", "S", "42"]);
            exec(&engine, &["expire", "S", "5"]);
        }
        let mut records: Vec<Vec<Vec<u8>>> = Vec::new();
        crate::aof::AppendLog::replay_path(&log_path, |cmd| records.push(cmd.argv)).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1][0], b"expireat".to_vec());
        let deadline: u64 = String::from_utf8_lossy(&records[1][2]).parse().unwrap();
        assert!(deadline >= before + 5 && deadline <= before + 7);
    }
}
