use std::collections::HashMap;

use tokio::sync::{broadcast, RwLock};

use crate::util::now_ms;

/// Logical channel carrying "your notification list changed" signals.
pub const CHANNEL_NOTIFICATIONS: &str = "notifications";
/// Logical channel carrying "your unread badge count changed" signals.
pub const CHANNEL_NOTIFICATION_COUNT: &str = "notifications_count";

const DEFAULT_CAPACITY: usize = 64;

/// Refresh signal, not a delta: subscribers re-run their query against the
/// notification store on every event.
#[derive(Clone, Debug)]
pub struct NotificationEvent {
    pub channel: &'static str,
    pub recipient_id: String,
    pub notification_id: Option<String>,
    pub emitted_at_ms: i64,
}

impl NotificationEvent {
    pub fn new(
        channel: &'static str,
        recipient_id: impl Into<String>,
        notification_id: Option<String>,
    ) -> Self {
        Self {
            channel,
            recipient_id: recipient_id.into(),
            notification_id,
            emitted_at_ms: now_ms(),
        }
    }
}

/// In-process fan-out keyed per (channel, recipient). Delivery is
/// at-most-once with no replay; the notification store stays the durable
/// source of truth and disconnected subscribers re-query on reconnect.
pub struct NotificationHub {
    capacity: usize,
    senders: RwLock<HashMap<String, broadcast::Sender<NotificationEvent>>>,
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            senders: RwLock::new(HashMap::new()),
        }
    }

    pub async fn subscribe(
        &self,
        channel: &'static str,
        recipient_id: &str,
    ) -> broadcast::Receiver<NotificationEvent> {
        let key = Self::key(channel, recipient_id);
        let mut senders = self.senders.write().await;
        senders
            .entry(key)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Returns the number of live receivers the event reached. Publishing
    /// into a channel nobody listens on is a no-op.
    pub async fn publish(&self, event: NotificationEvent) -> usize {
        let key = Self::key(event.channel, &event.recipient_id);
        {
            let senders = self.senders.read().await;
            match senders.get(&key) {
                Some(sender) if sender.receiver_count() > 0 => {
                    return sender.send(event).unwrap_or(0);
                }
                Some(_) => {}
                None => return 0,
            }
        }
        // Re-check under the write lock: a subscriber may have arrived since
        // the read-lock snapshot, and removing its sender would close the
        // stream it just opened.
        let mut senders = self.senders.write().await;
        match senders.get(&key) {
            Some(sender) if sender.receiver_count() > 0 => sender.send(event).unwrap_or(0),
            Some(_) => {
                senders.remove(&key);
                0
            }
            None => 0,
        }
    }

    fn key(channel: &str, recipient_id: &str) -> String {
        format!("{channel}:{recipient_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_only_the_matching_recipient_channel() {
        let hub = NotificationHub::default();
        let mut alice = hub.subscribe(CHANNEL_NOTIFICATIONS, "alice").await;
        let mut bob = hub.subscribe(CHANNEL_NOTIFICATIONS, "bob").await;

        let delivered = hub
            .publish(NotificationEvent::new(CHANNEL_NOTIFICATIONS, "alice", None))
            .await;
        assert_eq!(delivered, 1);

        let event = alice.try_recv().expect("alice receives");
        assert_eq!(event.recipient_id, "alice");
        assert!(bob.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_noop() {
        let hub = NotificationHub::default();
        let delivered = hub
            .publish(NotificationEvent::new(CHANNEL_NOTIFICATION_COUNT, "carol", None))
            .await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn dropped_receivers_stop_counting() {
        let hub = NotificationHub::default();
        let receiver = hub.subscribe(CHANNEL_NOTIFICATIONS, "dave").await;
        drop(receiver);
        let delivered = hub
            .publish(NotificationEvent::new(CHANNEL_NOTIFICATIONS, "dave", None))
            .await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn stale_sender_cleanup_never_strands_a_fresh_subscriber() {
        let hub = NotificationHub::default();
        drop(hub.subscribe(CHANNEL_NOTIFICATIONS, "erin").await);

        // Prunes the dead sender.
        let delivered = hub
            .publish(NotificationEvent::new(CHANNEL_NOTIFICATIONS, "erin", None))
            .await;
        assert_eq!(delivered, 0);

        let mut receiver = hub.subscribe(CHANNEL_NOTIFICATIONS, "erin").await;
        let delivered = hub
            .publish(NotificationEvent::new(CHANNEL_NOTIFICATIONS, "erin", None))
            .await;
        assert_eq!(delivered, 1);
        let event = receiver.recv().await.expect("channel stays open");
        assert_eq!(event.recipient_id, "erin");
    }
}
