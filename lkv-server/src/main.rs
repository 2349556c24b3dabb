//! # litekv-server
//!
//! Loads the config, restores state from the append log, and serves the
//! line protocol until a shutdown signal arrives.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

use lkv_common::Config;
use lkv_engine::Engine;
use lkv_server::{run_timer_loop, serve, ServerState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "litekv.conf".to_string());
    let config = Config::load(&config_path);
    info!(?config, "configuration resolved");

    let engine = Arc::new(Engine::new(config.clone()));
    let restored = engine.restore().context("replaying the append log")?;
    info!(records = restored, keys = engine.store().num_items(), "restore finished");

    let addr = format!("{}:{}", config.ip, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "listening");

    let state = Arc::new(ServerState::new(Arc::clone(&engine)));
    tokio::spawn(run_timer_loop(Arc::clone(&engine)));

    tokio::select! {
        result = serve(state, listener) => {
            result.context("accept loop failed")?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("installing the signal handler")?;
            info!("shutdown signal received");
        }
    }

    engine.flush_log().context("final append-log flush")?;
    info!("bye");
    Ok(())
}
