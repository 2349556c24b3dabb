//! # Server Configuration
//!
//! Parse the `key value` per-line config file. Unknown keys are ignored,
//! malformed values fall back to the defaults with a warning so a typo
//! never prevents startup.

use std::path::Path;

use tracing::warn;

/// Runtime configuration for the server and the persistence engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address.
    pub ip: String,
    /// Listen port.
    pub port: u16,
    /// Append-only log location.
    pub dumpfile: String,
    /// In-memory record capacity of one append-log buffer.
    pub dump_cachesize: usize,
    /// Memory budget in MB; 0 disables eviction.
    pub maxmem_mb: u64,
    /// Selects LRU-approximate eviction instead of random eviction.
    pub lru_enabled: bool,
    /// Fraction of the memory budget that triggers an eviction round.
    pub lru_trigger_ratio: f64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ip: "127.0.0.1".to_string(),
            port: 9527,
            dumpfile: "dump.aof".to_string(),
            dump_cachesize: 1024,
            maxmem_mb: 0,
            lru_enabled: false,
            lru_trigger_ratio: 0.8,
        }
    }
}

impl Config {
    /// Loads configuration from `path`, falling back to defaults when the
    /// file is absent or unreadable.
    pub fn load(path: impl AsRef<Path>) -> Config {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let mut config = Config::default();
                config.apply(&text);
                config
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "can not open config file, using defaults");
                Config::default()
            }
        }
    }

    fn apply(&mut self, text: &str) {
        // Keys and values are folded to lowercase like the rest of the verbs.
        let mut tokens = text.split_whitespace();
        while let (Some(key), Some(value)) = (tokens.next(), tokens.next()) {
            let key = key.to_ascii_lowercase();
            let value = value.to_ascii_lowercase();
            match key.as_str() {
                "ip" => self.ip = value,
                "port" => match value.parse::<u16>() {
                    Ok(port) => self.port = port,
                    Err(_) => warn!(%value, "port invalid, using default 9527"),
                },
                "dumpfile" => self.dumpfile = value,
                "dump-cachesize" => match value.parse::<usize>() {
                    Ok(size) if size > 0 => self.dump_cachesize = size,
                    _ => warn!(%value, "dump-cachesize invalid, using default 1024"),
                },
                "maxmem-mb" => match value.parse::<u64>() {
                    Ok(mb) => self.maxmem_mb = mb,
                    Err(_) => warn!(%value, "maxmem-mb invalid, eviction stays disabled"),
                },
                "lru-enabled" => {
                    self.lru_enabled = matches!(value.as_str(), "yes" | "true" | "on" | "1");
                }
                "lru-trigger-ratio" => match value.parse::<f64>() {
                    Ok(ratio) if ratio > 0.0 && ratio <= 1.0 => self.lru_trigger_ratio = ratio,
                    _ => warn!(%value, "lru-trigger-ratio invalid, using default 0.8"),
                },
                _ => {}
            }
        }
    }
}
