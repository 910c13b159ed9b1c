//! Per-user live connection registry
//!
//! A connection registers when its event stream opens and deregisters when
//! the returned [`ConnectionGuard`] is dropped (stream closed or errored).
//! Channels live in process memory; a multi-process deployment would put a
//! shared pub/sub layer behind the same interface.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::types::Notification;

/// Events buffered per user before slow receivers start lagging
const CHANNEL_CAPACITY: usize = 64;

/// Event delivered on a user's live stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum LiveEvent {
    Connected,
    Notification(Notification),
}

impl LiveEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            LiveEvent::Connected => "connected",
            LiveEvent::Notification(_) => "notification",
        }
    }
}

struct UserChannel {
    sender: broadcast::Sender<LiveEvent>,
    connections: usize,
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    channels: Arc<Mutex<HashMap<String, UserChannel>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, UserChannel>> {
        // a panic while holding the lock cannot leave the map half-updated
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a connection for `user_id`
    pub fn register(&self, user_id: &str) -> (ConnectionGuard, broadcast::Receiver<LiveEvent>) {
        let mut channels = self.lock();
        let channel = channels
            .entry(user_id.to_string())
            .or_insert_with(|| UserChannel {
                sender: broadcast::channel(CHANNEL_CAPACITY).0,
                connections: 0,
            });
        channel.connections += 1;
        let receiver = channel.sender.subscribe();

        tracing::debug!(user_id = %user_id, connections = channel.connections, "Live connection registered");

        let guard = ConnectionGuard {
            registry: self.clone(),
            user_id: user_id.to_string(),
        };
        (guard, receiver)
    }

    fn deregister(&self, user_id: &str) {
        let mut channels = self.lock();
        if let Some(channel) = channels.get_mut(user_id) {
            channel.connections = channel.connections.saturating_sub(1);
            if channel.connections == 0 {
                channels.remove(user_id);
            }
        }
        tracing::debug!(user_id = %user_id, "Live connection closed");
    }

    /// Deliver to every open connection of `user_id`. Returns how many
    /// connections received it; zero is not an error.
    pub fn publish(&self, user_id: &str, event: LiveEvent) -> usize {
        let channels = self.lock();
        match channels.get(user_id) {
            Some(channel) => channel.sender.send(event).unwrap_or(0),
            None => 0,
        }
    }

    pub fn connection_count(&self, user_id: &str) -> usize {
        self.lock().get(user_id).map_or(0, |c| c.connections)
    }
}

/// Deregisters its connection on drop
pub struct ConnectionGuard {
    registry: ConnectionRegistry,
    user_id: String,
}

impl ConnectionGuard {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.deregister(&self.user_id);
    }
}
