//! # Snapshot Generator
//!
//! Replays an append-only log into a fresh keyspace and writes the binary
//! snapshot. Usage: `make-snapshot <source-log> <dest-snapshot>`.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use lkv_common::Config;
use lkv_engine::{AppendLog, Engine};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let (src, dst) = match (args.next(), args.next()) {
        (Some(src), Some(dst)) => (PathBuf::from(src), PathBuf::from(dst)),
        _ => bail!("usage: make-snapshot <source-log> <dest-snapshot>"),
    };

    let engine = Engine::in_memory(Config::default());
    let records = AppendLog::replay_path(&src, |cmd| {
        engine.dispatch(&cmd, false, None);
    })
    .with_context(|| format!("replaying {}", src.display()))?;

    let saved = engine
        .save_snapshot(&dst)
        .with_context(|| format!("writing {}", dst.display()))?;
    println!("{records} log records replayed, {saved} keys snapshotted");
    Ok(())
}
