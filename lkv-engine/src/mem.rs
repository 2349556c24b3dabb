//! # Resident Memory Sampler
//!
//! Reads `VmRSS` from `/proc/self/status` on a background thread every
//! 100 ms and publishes it through an atomic, so the eviction check on the
//! command path costs one load. On platforms without procfs the sampler
//! reports zero and eviction simply never triggers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Sampling period.
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Parses `VmRSS` (in kB) out of `/proc/self/status`.
pub fn read_self_rss_kb() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss_kb(&status)
}

fn parse_vm_rss_kb(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    line.split_whitespace().nth(1)?.parse().ok()
}

/// Background thread publishing the latest resident-size sample.
pub struct MemSampler {
    rss_kb: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl MemSampler {
    /// Starts sampling; the first value is read synchronously so callers
    /// never observe a startup zero on procfs systems.
    pub fn start() -> Self {
        let rss_kb = Arc::new(AtomicU64::new(read_self_rss_kb().unwrap_or(0)));
        let stop = Arc::new(AtomicBool::new(false));

        let rss_thread = Arc::clone(&rss_kb);
        let stop_thread = Arc::clone(&stop);
        let join = std::thread::spawn(move || {
            while !stop_thread.load(Ordering::Acquire) {
                std::thread::sleep(SAMPLE_INTERVAL);
                if let Some(sample) = read_self_rss_kb() {
                    rss_thread.store(sample, Ordering::Relaxed);
                }
            }
        });

        MemSampler {
            rss_kb,
            stop,
            join: Some(join),
        }
    }

    /// Latest resident size in kB; zero when procfs is unavailable.
    pub fn rss_kb(&self) -> u64 {
        self.rss_kb.load(Ordering::Relaxed)
    }
}

impl Drop for MemSampler {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
