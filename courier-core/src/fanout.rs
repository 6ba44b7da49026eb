use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing;

use crate::config::FanoutConfig;
use crate::types::Notification;

/// Lightweight, non-durable pub/sub used to hand a notification to whichever
/// sessions currently hold the recipient's live connections. One broadcast
/// topic per recipient; a publish with nobody subscribed is dropped — the
/// durable queue, not this layer, is what guarantees delivery.
pub struct FanoutBroadcaster {
    topics: DashMap<String, broadcast::Sender<Arc<Notification>>>,
    capacity: usize,
}

impl FanoutBroadcaster {
    pub fn new(config: &FanoutConfig) -> Self {
        FanoutBroadcaster {
            topics: DashMap::new(),
            capacity: config.capacity,
        }
    }

    /// Subscribes to a recipient's topic. Each live session calls this once;
    /// receivers that lag past the channel capacity skip messages and catch
    /// up through the next backlog sync.
    pub fn subscribe(&self, recipient_id: &str) -> broadcast::Receiver<Arc<Notification>> {
        self.topics
            .entry(recipient_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Publishes to every live subscriber, returning how many received it.
    /// Zero means no session is listening on this process.
    pub fn publish(&self, recipient_id: &str, notification: Arc<Notification>) -> usize {
        let delivered = match self.topics.get(recipient_id) {
            Some(tx) => tx.send(notification).unwrap_or(0),
            None => 0,
        };

        if delivered == 0 {
            // Idle topics are pruned so the map does not grow with every
            // recipient ever published to.
            self.topics
                .remove_if(recipient_id, |_, tx| tx.receiver_count() == 0);
        } else {
            tracing::debug!(
                recipient_id = %recipient_id,
                subscribers = delivered,
                "notification published to fanout"
            );
        }

        delivered
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NewNotification, NotificationKind, Priority};
    use chrono::Utc;

    fn notification(recipient: &str) -> Arc<Notification> {
        Arc::new(
            NewNotification {
                recipient_id: recipient.to_string(),
                kind: NotificationKind::Alert,
                title: "t".to_string(),
                body: "b".to_string(),
                priority: Priority::Medium,
                metadata: None,
                action_url: None,
            }
            .into_notification(Utc::now()),
        )
    }

    fn fanout() -> FanoutBroadcaster {
        FanoutBroadcaster::new(&FanoutConfig { capacity: 16 })
    }

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let hub = fanout();
        let mut rx1 = hub.subscribe("u1");
        let mut rx2 = hub.subscribe("u1");

        let n = notification("u1");
        assert_eq!(hub.publish("u1", n.clone()), 2);

        assert_eq!(rx1.recv().await.unwrap().id, n.id);
        assert_eq!(rx2.recv().await.unwrap().id, n.id);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_dropped() {
        let hub = fanout();
        assert_eq!(hub.publish("nobody", notification("nobody")), 0);
        assert_eq!(hub.topic_count(), 0);
    }

    #[tokio::test]
    async fn topics_are_isolated_per_recipient() {
        let hub = fanout();
        let mut rx1 = hub.subscribe("u1");
        let _rx2 = hub.subscribe("u2");

        hub.publish("u1", notification("u1"));

        assert_eq!(rx1.recv().await.unwrap().recipient_id, "u1");
        // u2's receiver saw nothing.
        let mut rx2 = hub.subscribe("u2");
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_subscribers_prune_the_topic() {
        let hub = fanout();
        let rx = hub.subscribe("u1");
        assert_eq!(hub.topic_count(), 1);
        drop(rx);

        assert_eq!(hub.publish("u1", notification("u1")), 0);
        assert_eq!(hub.topic_count(), 0);
    }
}
