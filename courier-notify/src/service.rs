use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing;
use uuid::Uuid;

use courier_core::error::{CourierError, Result};
use courier_core::filter;
use courier_core::retry::RetryPolicy;
use courier_core::types::{Channel, NewNotification, Notification, QueuedDelivery};
use courier_core::CourierContext;

/// Producer-facing accept path plus the recipient-facing inbox operations.
///
/// Every mutation for one recipient funnels through that recipient's async
/// mutex, so acks and reads are processed in the order they arrive and a
/// replayed old ack can never undo a newer state change.
pub struct NotificationService {
    ctx: CourierContext,
    accept_retry: RetryPolicy,
    recipient_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl NotificationService {
    pub fn new(ctx: CourierContext) -> Self {
        NotificationService {
            ctx,
            accept_retry: RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(2)),
            recipient_locks: DashMap::new(),
        }
    }

    pub fn context(&self) -> &CourierContext {
        &self.ctx
    }

    /// Accepts a notification from arbitrary backend code. Returns as soon
    /// as the record is durably queued; delivery happens asynchronously.
    ///
    /// The preference filter runs here, before anything is persisted: a
    /// dropped notification is terminal and never touches the queue.
    /// Transient store failures are retried locally with backoff before a
    /// retryable error is surfaced to the producer.
    pub async fn send(&self, new: NewNotification) -> Result<Uuid> {
        validate(&new)?;

        let prefs = self.ctx.prefs.get(&new.recipient_id).await?;
        let now = Utc::now();
        let notification = new.into_notification(now);
        let decision = filter::evaluate(&notification, &prefs, now);

        if !decision.deliver {
            tracing::debug!(
                notification_id = %notification.id,
                recipient_id = %notification.recipient_id,
                "notification dropped by preference filter"
            );
            return Ok(notification.id);
        }

        let mut attempt = 0u32;
        loop {
            match self
                .persist_and_enqueue(&notification, &decision.channels)
                .await
            {
                Ok(_) => break,
                Err(e) if e.is_retryable() => match self.accept_retry.next_delay(attempt + 1) {
                    Some(delay) => {
                        attempt += 1;
                        tracing::warn!(
                            notification_id = %notification.id,
                            attempt,
                            "transient store error on accept, retrying: {}",
                            e
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            notification_id = %notification.id,
            recipient_id = %notification.recipient_id,
            kind = notification.kind.as_str(),
            "notification accepted"
        );

        Ok(notification.id)
    }

    async fn persist_and_enqueue(
        &self,
        notification: &Notification,
        channels: &[Channel],
    ) -> Result<QueuedDelivery> {
        self.ctx.store.put(notification.clone()).await?;
        self.ctx
            .queue
            .enqueue(
                notification.id,
                &notification.recipient_id,
                channels.to_vec(),
                notification.created_at,
            )
            .await
    }

    /// Client acknowledgment: the wire push reached the device. Removes the
    /// queue record and stamps the notification delivered. Stale acks —
    /// unknown ids, deleted notifications, someone else's ids — are no-ops.
    pub async fn ack(&self, recipient_id: &str, notification_id: Uuid) -> Result<bool> {
        let lock = self.recipient_lock(recipient_id);
        let _guard = lock.lock().await;

        if !self.owned_by(recipient_id, notification_id).await? {
            return Ok(false);
        }

        if self.ctx.queue.ack(notification_id).await {
            self.ctx
                .store
                .mark_delivered(notification_id, Utc::now())
                .await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Idempotent mark-read. Reading implies receipt, so this also settles
    /// any outstanding queue record for the id.
    pub async fn mark_read(&self, recipient_id: &str, notification_id: Uuid) -> Result<bool> {
        let lock = self.recipient_lock(recipient_id);
        let _guard = lock.lock().await;

        if !self.owned_by(recipient_id, notification_id).await? {
            return Ok(false);
        }

        self.ctx.queue.ack(notification_id).await;
        self.ctx.store.mark_read(notification_id, Utc::now()).await
    }

    pub async fn mark_all_read(&self, recipient_id: &str) -> Result<u64> {
        let lock = self.recipient_lock(recipient_id);
        let _guard = lock.lock().await;

        self.ctx.queue.remove_recipient(recipient_id).await;
        self.ctx.store.mark_all_read(recipient_id, Utc::now()).await
    }

    /// User-initiated delete. Also removes the queue record so an in-flight
    /// delivery of this id dies quietly.
    pub async fn delete(&self, recipient_id: &str, notification_id: Uuid) -> Result<bool> {
        let lock = self.recipient_lock(recipient_id);
        let _guard = lock.lock().await;

        if !self.owned_by(recipient_id, notification_id).await? {
            return Ok(false);
        }

        self.ctx.queue.remove(notification_id).await;
        self.ctx.store.delete(notification_id).await
    }

    pub async fn clear_all(&self, recipient_id: &str) -> Result<u64> {
        let lock = self.recipient_lock(recipient_id);
        let _guard = lock.lock().await;

        self.ctx.queue.remove_recipient(recipient_id).await;
        let removed = self.ctx.store.delete_for_recipient(recipient_id).await?;
        Ok(removed.len() as u64)
    }

    /// Notifications accepted while the recipient was offline, oldest first.
    /// Pushed inside `connected{backlog}` before the session goes live.
    pub async fn backlog(&self, recipient_id: &str) -> Result<Vec<Notification>> {
        let mut items = Vec::new();
        for record in self.ctx.queue.pending_for(recipient_id) {
            if let Some(notification) = self.ctx.store.get(record.notification_id).await? {
                items.push(notification);
            }
        }
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(items)
    }

    pub async fn unread_count(&self, recipient_id: &str) -> Result<u64> {
        self.ctx.store.count_unread(recipient_id).await
    }

    fn recipient_lock(&self, recipient_id: &str) -> Arc<Mutex<()>> {
        self.recipient_locks
            .entry(recipient_id.to_string())
            .or_default()
            .clone()
    }

    async fn owned_by(&self, recipient_id: &str, notification_id: Uuid) -> Result<bool> {
        match self.ctx.store.get(notification_id).await? {
            Some(notification) => Ok(notification.recipient_id == recipient_id),
            None => Ok(false),
        }
    }
}

fn validate(new: &NewNotification) -> Result<()> {
    if new.recipient_id.trim().is_empty() {
        return Err(CourierError::InvalidNotification(
            "recipient_id is required".to_string(),
        ));
    }
    if new.title.trim().is_empty() {
        return Err(CourierError::InvalidNotification(
            "title is required".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::types::{NotificationKind, Priority, UserPreferences};
    use courier_core::Config;

    async fn service() -> NotificationService {
        let ctx = CourierContext::new(Config::default()).await.unwrap();
        NotificationService::new(ctx)
    }

    fn new_notification(recipient: &str, priority: Priority) -> NewNotification {
        NewNotification {
            recipient_id: recipient.to_string(),
            kind: NotificationKind::Alert,
            title: "Server down".to_string(),
            body: "Production is on fire".to_string(),
            priority,
            metadata: None,
            action_url: None,
        }
    }

    #[tokio::test]
    async fn send_rejects_malformed_notifications() {
        let svc = service().await;

        let mut missing_recipient = new_notification("", Priority::Medium);
        missing_recipient.recipient_id = "  ".to_string();
        assert!(matches!(
            svc.send(missing_recipient).await,
            Err(CourierError::InvalidNotification(_))
        ));

        let mut missing_title = new_notification("u1", Priority::Medium);
        missing_title.title = String::new();
        assert!(matches!(
            svc.send(missing_title).await,
            Err(CourierError::InvalidNotification(_))
        ));

        // Nothing was queued for either.
        assert!(svc.context().queue.is_empty());
    }

    #[tokio::test]
    async fn send_persists_and_queues() {
        let svc = service().await;
        let id = svc.send(new_notification("u1", Priority::Medium)).await.unwrap();

        let stored = svc.context().store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.recipient_id, "u1");
        assert!(!stored.is_delivered());

        let pending = svc.context().queue.pending_for("u1");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].notification_id, id);
    }

    #[tokio::test]
    async fn filter_drop_is_terminal() {
        let svc = service().await;
        let mut prefs = UserPreferences::defaults_for("u1");
        prefs.do_not_disturb = true;
        svc.context().prefs.set(prefs).await.unwrap();

        let id = svc.send(new_notification("u1", Priority::Medium)).await.unwrap();

        // Accepted but neither persisted nor queued.
        assert!(svc.context().store.get(id).await.unwrap().is_none());
        assert!(svc.context().queue.is_empty());

        // High priority punches through the same preferences.
        let id = svc.send(new_notification("u1", Priority::High)).await.unwrap();
        assert!(svc.context().store.get(id).await.unwrap().is_some());
        assert_eq!(svc.context().queue.len(), 1);
    }

    #[tokio::test]
    async fn ack_settles_the_record_and_is_idempotent() {
        let svc = service().await;
        let id = svc.send(new_notification("u1", Priority::Medium)).await.unwrap();

        assert!(svc.ack("u1", id).await.unwrap());
        assert!(svc.context().queue.is_empty());
        let stored = svc.context().store.get(id).await.unwrap().unwrap();
        assert!(stored.is_delivered());
        assert!(!stored.is_read());

        // Replayed ack: no-op, not an error.
        assert!(!svc.ack("u1", id).await.unwrap());
    }

    #[tokio::test]
    async fn ack_for_someone_elses_notification_is_ignored() {
        let svc = service().await;
        let id = svc.send(new_notification("u1", Priority::Medium)).await.unwrap();

        assert!(!svc.ack("u2", id).await.unwrap());
        assert_eq!(svc.context().queue.pending_for("u1").len(), 1);
    }

    #[tokio::test]
    async fn mark_read_is_idempotent_and_decrements_unread() {
        let svc = service().await;
        let first = svc.send(new_notification("u1", Priority::Medium)).await.unwrap();
        let _second = svc.send(new_notification("u1", Priority::Medium)).await.unwrap();

        assert_eq!(svc.unread_count("u1").await.unwrap(), 2);

        assert!(svc.mark_read("u1", first).await.unwrap());
        assert_eq!(svc.unread_count("u1").await.unwrap(), 1);

        // Re-sending mark-read changes nothing.
        assert!(!svc.mark_read("u1", first).await.unwrap());
        assert_eq!(svc.unread_count("u1").await.unwrap(), 1);

        let stored = svc.context().store.get(first).await.unwrap().unwrap();
        assert!(stored.is_read());
        assert!(stored.is_delivered());
    }

    #[tokio::test]
    async fn mark_all_read_clears_the_queue_lane() {
        let svc = service().await;
        svc.send(new_notification("u1", Priority::Medium)).await.unwrap();
        svc.send(new_notification("u1", Priority::Medium)).await.unwrap();
        svc.send(new_notification("u2", Priority::Medium)).await.unwrap();

        assert_eq!(svc.mark_all_read("u1").await.unwrap(), 2);
        assert_eq!(svc.unread_count("u1").await.unwrap(), 0);
        assert!(svc.context().queue.pending_for("u1").is_empty());

        // u2 untouched.
        assert_eq!(svc.unread_count("u2").await.unwrap(), 1);
        assert_eq!(svc.context().queue.pending_for("u2").len(), 1);
    }

    #[tokio::test]
    async fn delete_suppresses_later_acks() {
        let svc = service().await;
        let id = svc.send(new_notification("u1", Priority::Medium)).await.unwrap();

        assert!(svc.delete("u1", id).await.unwrap());
        assert!(svc.context().queue.is_empty());

        // An ack for the deleted id arriving afterwards is a no-op.
        assert!(!svc.ack("u1", id).await.unwrap());
        assert!(svc.context().store.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_all_removes_store_and_queue_state() {
        let svc = service().await;
        svc.send(new_notification("u1", Priority::Medium)).await.unwrap();
        svc.send(new_notification("u1", Priority::High)).await.unwrap();

        assert_eq!(svc.clear_all("u1").await.unwrap(), 2);
        assert_eq!(svc.unread_count("u1").await.unwrap(), 0);
        assert!(svc.context().queue.is_empty());
        assert!(svc.backlog("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn backlog_is_oldest_first() {
        let svc = service().await;
        let a = svc.send(new_notification("u1", Priority::Medium)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let b = svc.send(new_notification("u1", Priority::Medium)).await.unwrap();

        let backlog = svc.backlog("u1").await.unwrap();
        assert_eq!(backlog.len(), 2);
        assert_eq!(backlog[0].id, a);
        assert_eq!(backlog[1].id, b);
    }
}
