//! # Store Benchmark Harness
//!
//! Purpose: Provide a repeatable benchmark driver for the sharded keyspace
//! so baseline throughput can be compared over time.
//!
//! ## Design Principles
//! 1. **Deterministic Workload**: A fixed PRNG seed keeps runs comparable.
//! 2. **Allocation Control**: Keys and values are pre-built off the hot path.
//! 3. **Direct Calls**: The store is exercised without dispatcher overhead.

use std::env;
use std::hint::black_box;
use std::time::Instant;

use lkv_core::KvStore;

const DEFAULT_KEY_COUNT: usize = 1 << 16;
const DEFAULT_OP_COUNT: usize = 1_000_000;
const DEFAULT_VALUE_SIZE: usize = 128;

struct BenchConfig {
    key_count: usize,
    key_mask: usize,
    op_count: usize,
    value_size: usize,
}

impl BenchConfig {
    fn from_args() -> Self {
        let mut args = env::args().skip(1);
        let requested = parse_usize(args.next(), DEFAULT_KEY_COUNT);
        let op_count = parse_usize(args.next(), DEFAULT_OP_COUNT);
        let value_size = parse_usize(args.next(), DEFAULT_VALUE_SIZE);
        let key_count = requested.max(1).next_power_of_two();
        BenchConfig {
            key_count,
            key_mask: key_count - 1,
            op_count,
            value_size,
        }
    }
}

fn parse_usize(value: Option<String>, fallback: usize) -> usize {
    value.and_then(|raw| raw.parse().ok()).unwrap_or(fallback)
}

/// XorShift keeps the workload reproducible without pulling in a seedable
/// generator just for the benchmark.
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_index(&mut self, mask: usize) -> usize {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        (x as usize) & mask
    }
}

fn report(label: &str, ops: usize, elapsed: std::time::Duration) {
    let secs = elapsed.as_secs_f64();
    println!(
        "{label}: {ops} ops in {secs:.3}s ({:.0} ops/s)",
        ops as f64 / secs
    );
}

fn main() {
    let config = BenchConfig::from_args();
    let store = KvStore::new();

    let keys: Vec<Vec<u8>> = (0..config.key_count)
        .map(|i| format!("bench-key-{i:08}").into_bytes())
        .collect();
    let value = vec![b'v'; config.value_size];

    let start = Instant::now();
    for key in &keys {
        store.set_str(key, &value);
    }
    report("LOAD", config.key_count, start.elapsed());

    let mut rng = XorShift64::new(0x1234_5678_9ABC_DEF0);
    let start = Instant::now();
    for _ in 0..config.op_count {
        let idx = rng.next_index(config.key_mask);
        black_box(store.get_scalar(&keys[idx]).ok());
    }
    report("GET", config.op_count, start.elapsed());

    let mut rng = XorShift64::new(0x0FED_CBA9_8765_4321);
    let start = Instant::now();
    for _ in 0..config.op_count {
        let idx = rng.next_index(config.key_mask);
        store.set_str(&keys[idx], &value);
    }
    report("SET", config.op_count, start.elapsed());

    println!("{} keys resident after benchmark", store.num_items());
}
