//! Fan-out of room events to connected clients. The engine publishes
//! through the [`Broadcaster`] seam; the hub owns topic -> subscriber
//! routing and wraps each event in a [`ServerMessage::Event`] frame.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::mpsc;

use menumatch_core::broadcast::{Broadcaster, RoomEvent};
use menumatch_core::protocol::ServerMessage;

#[derive(Default)]
pub struct ConnectionHub {
    // Publish is called from sync engine code, so this is a std lock with
    // unbounded senders; neither side ever awaits while holding it.
    topics: RwLock<HashMap<String, HashMap<String, mpsc::UnboundedSender<ServerMessage>>>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        topic: &str,
        username: &str,
        tx: mpsc::UnboundedSender<ServerMessage>,
    ) {
        let mut topics = self.topics.write().unwrap();
        topics
            .entry(topic.to_string())
            .or_default()
            .insert(username.to_string(), tx);
    }

    pub fn unsubscribe(&self, topic: &str, username: &str) {
        let mut topics = self.topics.write().unwrap();
        if let Some(subscribers) = topics.get_mut(topic) {
            subscribers.remove(username);
            if subscribers.is_empty() {
                topics.remove(topic);
            }
        }
    }

    /// Drop every subscription a user holds, across all topics.
    pub fn unsubscribe_all(&self, username: &str) {
        let mut topics = self.topics.write().unwrap();
        topics.retain(|_, subscribers| {
            subscribers.remove(username);
            !subscribers.is_empty()
        });
    }

    /// Drop a whole topic. Used when the room behind it is erased.
    pub fn remove_topic(&self, topic: &str) {
        self.topics.write().unwrap().remove(topic);
    }

    #[cfg(test)]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .unwrap()
            .get(topic)
            .map(|s| s.len())
            .unwrap_or(0)
    }
}

impl Broadcaster for ConnectionHub {
    fn publish(&self, topic: &str, event: &RoomEvent) {
        let mut dead: Vec<String> = Vec::new();
        {
            let topics = self.topics.read().unwrap();
            let Some(subscribers) = topics.get(topic) else {
                return;
            };
            let msg = ServerMessage::Event {
                topic: topic.to_string(),
                event: event.clone(),
            };
            for (username, tx) in subscribers {
                if tx.send(msg.clone()).is_err() {
                    dead.push(username.clone());
                }
            }
        }
        for username in dead {
            tracing::debug!(topic, username, "dropping closed subscriber");
            self.unsubscribe(topic, &username);
        }
    }
}
