//! # Pub/Sub Channel Registry
//!
//! Maps channel names to the live sessions subscribed to them. Sessions
//! receive published frames through their unbounded push channel; a send
//! that fails means the session is gone and it is dropped from the channel.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;

type SessionId = u64;

/// Server-wide subscription registry.
#[derive(Default)]
pub struct PubSub {
    channels: Mutex<HashMap<Vec<u8>, HashMap<SessionId, UnboundedSender<Vec<u8>>>>>,
}

impl PubSub {
    pub fn new() -> Self {
        PubSub::default()
    }

    /// Adds a session to a channel; re-subscribing replaces the sender.
    pub fn subscribe(&self, channel: &[u8], session: SessionId, tx: UnboundedSender<Vec<u8>>) {
        self.channels
            .lock()
            .entry(channel.to_vec())
            .or_default()
            .insert(session, tx);
    }

    /// Removes a session from a channel, dropping the channel when empty.
    pub fn unsubscribe(&self, channel: &[u8], session: SessionId) {
        let mut channels = self.channels.lock();
        if let Some(sessions) = channels.get_mut(channel) {
            sessions.remove(&session);
            if sessions.is_empty() {
                channels.remove(channel);
            }
        }
    }

    /// Sends `frame` to every subscriber of `channel`; returns how many
    /// sessions accepted it. Dead sessions are pruned on the way.
    pub fn publish(&self, channel: &[u8], frame: &[u8]) -> i64 {
        let mut channels = self.channels.lock();
        let sessions = match channels.get_mut(channel) {
            Some(sessions) => sessions,
            None => return 0,
        };
        let mut delivered = 0i64;
        sessions.retain(|_, tx| match tx.send(frame.to_vec()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => false,
        });
        if sessions.is_empty() {
            channels.remove(channel);
        }
        delivered
    }

    /// Number of sessions currently on a channel; test hook.
    pub fn subscriber_count(&self, channel: &[u8]) -> usize {
        self.channels
            .lock()
            .get(channel)
            .map(|sessions| sessions.len())
            .unwrap_or(0)
    }
}
