//! In-memory pub/sub for single-node deployments.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use pulse_core::traits::cache::{PubSubMessage, Subscription};

/// Subscriber id unique within one registry.
type SubscriberId = u64;

/// Fan-out table mapping channel names to subscriber delivery buffers.
///
/// Publishing never blocks: a subscriber whose buffer is full misses the
/// message.
#[derive(Debug)]
pub struct PubSubRegistry {
    /// Channel name → subscriber id → delivery buffer.
    channels: DashMap<String, HashMap<SubscriberId, mpsc::Sender<PubSubMessage>>>,
    /// Next subscriber id.
    next_id: AtomicU64,
    /// Buffer size for each subscriber.
    buffer_size: usize,
}

impl PubSubRegistry {
    /// Create a new registry.
    pub fn new(buffer_size: usize) -> Self {
        Self {
            channels: DashMap::new(),
            next_id: AtomicU64::new(1),
            buffer_size: buffer_size.max(1),
        }
    }

    /// Publish to every subscriber of `channel`. Returns how many accepted it.
    pub fn publish(&self, channel: &str, payload: &str) -> u64 {
        let Some(subscribers) = self.channels.get(channel) else {
            return 0;
        };

        let mut delivered = 0;
        for (id, tx) in subscribers.iter() {
            let msg = PubSubMessage {
                channel: channel.to_string(),
                payload: payload.to_string(),
            };
            match tx.try_send(msg) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!(channel, subscriber = id, "Subscriber buffer full, message dropped");
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    /// Register a subscriber on `channels`.
    ///
    /// Closing the returned subscription removes it from every channel.
    pub fn subscribe(self: &Arc<Self>, channels: &[&str]) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer_size);

        for channel in channels {
            self.channels
                .entry((*channel).to_string())
                .or_default()
                .insert(id, tx.clone());
        }

        let names: Vec<String> = channels.iter().map(|c| (*c).to_string()).collect();
        let registry = Arc::downgrade(self);
        let to_remove = names.clone();
        Subscription::new(names, rx, move || {
            if let Some(registry) = registry.upgrade() {
                registry.unsubscribe(id, &to_remove);
            }
        })
    }

    /// Number of live subscribers on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map(|s| s.len()).unwrap_or(0)
    }

    /// Drop every subscriber. Their subscriptions then yield `None`.
    pub fn clear(&self) {
        self.channels.clear();
    }

    fn unsubscribe(&self, id: SubscriberId, channels: &[String]) {
        for channel in channels {
            let now_empty = match self.channels.get_mut(channel) {
                Some(mut subscribers) => {
                    subscribers.remove(&id);
                    subscribers.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.channels.remove_if(channel, |_, subscribers| subscribers.is_empty());
            }
        }
        debug!(subscriber = id, "Subscriber removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fan_out_to_all_subscribers() {
        let registry = Arc::new(PubSubRegistry::new(8));
        let mut a = registry.subscribe(&["room:1"]);
        let mut b = registry.subscribe(&["room:1", "room:2"]);

        assert_eq!(registry.publish("room:1", "hi"), 2);
        assert_eq!(registry.publish("room:2", "yo"), 1);
        assert_eq!(registry.publish("room:3", "nobody"), 0);

        assert_eq!(a.recv().await.unwrap().payload, "hi");
        assert_eq!(b.recv().await.unwrap().payload, "hi");
        let msg = b.recv().await.unwrap();
        assert_eq!(msg.channel, "room:2");
        assert_eq!(msg.payload, "yo");
    }

    #[tokio::test]
    async fn test_full_buffer_drops_instead_of_blocking() {
        let registry = Arc::new(PubSubRegistry::new(2));
        let mut sub = registry.subscribe(&["busy"]);

        assert_eq!(registry.publish("busy", "1"), 1);
        assert_eq!(registry.publish("busy", "2"), 1);
        assert_eq!(registry.publish("busy", "3"), 0);

        assert_eq!(sub.recv().await.unwrap().payload, "1");
        assert_eq!(sub.recv().await.unwrap().payload, "2");
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_close_deregisters() {
        let registry = Arc::new(PubSubRegistry::new(4));
        let mut sub = registry.subscribe(&["a", "b"]);
        assert_eq!(registry.subscriber_count("a"), 1);

        sub.close();
        assert_eq!(registry.subscriber_count("a"), 0);
        assert_eq!(registry.subscriber_count("b"), 0);
        assert_eq!(registry.publish("a", "x"), 0);
        assert!(sub.recv().await.is_none());
    }
}
