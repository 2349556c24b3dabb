//! # TCP Server
//!
//! Accept RESP2 connections, parse commands incrementally, and dispatch
//! them to the storage engine. Each session owns a push channel so
//! published pub/sub frames interleave with its own replies.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tracing::{debug, info};

use lkv_common::{Reply, RespError, RespParser};
use lkv_engine::{Engine, SessionHooks};

use crate::pubsub::PubSub;

/// Shared state handed to every session task.
pub struct ServerState {
    pub engine: Arc<Engine>,
    pub pubsub: Arc<PubSub>,
    next_session: AtomicU64,
}

impl ServerState {
    pub fn new(engine: Arc<Engine>) -> Self {
        ServerState {
            engine,
            pubsub: Arc::new(PubSub::new()),
            next_session: AtomicU64::new(1),
        }
    }
}

/// Accept loop; one task per connection.
pub async fn serve(state: Arc<ServerState>, listener: TcpListener) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            debug!(%peer, "session opened");
            if let Err(err) = handle_connection(stream, state).await {
                debug!(%peer, %err, "session closed with error");
            } else {
                debug!(%peer, "session closed");
            }
        });
    }
}

/// The dispatcher's view of one session: its subscriptions plus the push
/// sender other sessions publish through.
struct Session {
    id: u64,
    pubsub: Arc<PubSub>,
    push: UnboundedSender<Vec<u8>>,
    channels: HashSet<Vec<u8>>,
}

impl Session {
    fn drop_subscriptions(&self) {
        for channel in &self.channels {
            self.pubsub.unsubscribe(channel, self.id);
        }
    }
}

impl SessionHooks for Session {
    fn subscribe(&mut self, channel: &[u8]) -> usize {
        self.channels.insert(channel.to_vec());
        self.pubsub.subscribe(channel, self.id, self.push.clone());
        self.channels.len()
    }

    fn unsubscribe(&mut self, channel: &[u8]) -> usize {
        self.channels.remove(channel);
        self.pubsub.unsubscribe(channel, self.id);
        self.channels.len()
    }

    fn channels(&self) -> Vec<Vec<u8>> {
        self.channels.iter().cloned().collect()
    }

    fn publish(&mut self, channel: &[u8], message: &[u8]) -> i64 {
        let frame = Reply::Array(vec![
            Reply::bulk("message"),
            Reply::Bulk(channel.to_vec()),
            Reply::Bulk(message.to_vec()),
        ])
        .encode();
        self.pubsub.publish(channel, &frame)
    }
}

/// Handles one client connection until EOF or a protocol violation.
pub async fn handle_connection(
    mut stream: TcpStream,
    state: Arc<ServerState>,
) -> std::io::Result<()> {
    let (push_tx, mut push_rx) = unbounded_channel::<Vec<u8>>();
    let mut session = Session {
        id: state.next_session.fetch_add(1, Ordering::Relaxed),
        pubsub: Arc::clone(&state.pubsub),
        push: push_tx,
        channels: HashSet::new(),
    };
    let mut parser = RespParser::new();
    let mut buffer = BytesMut::with_capacity(8 * 1024);

    let result = loop {
        tokio::select! {
            read = stream.read_buf(&mut buffer) => {
                if read? == 0 {
                    break Ok(());
                }
                loop {
                    match parser.parse(&mut buffer) {
                        Ok(Some(cmd)) => {
                            let reply = state.engine.dispatch(&cmd, true, Some(&mut session));
                            stream.write_all(&reply.encode()).await?;
                        }
                        Ok(None) => break,
                        Err(RespError::Protocol) => {
                            stream.write_all(b"-ERROR protocol error\r\n").await?;
                            session.drop_subscriptions();
                            return Ok(());
                        }
                    }
                }
            }
            Some(frame) = push_rx.recv() => {
                stream.write_all(&frame).await?;
            }
        }
    };
    session.drop_subscriptions();
    result
}

/// Periodically fires due TTL timers from the reactor's idle path.
pub async fn run_timer_loop(engine: Arc<Engine>) {
    let mut tick = tokio::time::interval(std::time::Duration::from_millis(50));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tick.tick().await;
        let fired = engine.fire_expired();
        if fired > 0 {
            info!(fired, "expired keys removed");
        }
    }
}
