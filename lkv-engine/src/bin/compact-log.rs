//! # Offline Log Compactor
//!
//! Rewrites an append-only log with each key's history folded into the
//! minimal command sequence. Usage: `compact-log <source> <dest>`.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use lkv_engine::compact_log;

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
        _ => bail!("usage: compact-log <source> <dest>"),
    };
    if src == dst {
        bail!("source and dest must differ");
    }

    let stats = compact_log(&src, &dst)
        .with_context(|| format!("compacting {} into {}", src.display(), dst.display()))?;
    println!(
        "{} records over {} keys folded into {} records",
        stats.records_in, stats.keys, stats.records_out
    );
    Ok(())
}
