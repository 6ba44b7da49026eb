//! Pluggable persistence seams. The pipeline owns delivery semantics; the
//! records themselves live behind these traits so a deployment can back them
//! with whatever durable store it already runs. The in-memory
//! implementations below are the defaults and the test backends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{Notification, QueuedDelivery, UserPreferences};

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn put(&self, notification: Notification) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Notification>>;
    /// Returns true when a record was removed.
    async fn delete(&self, id: Uuid) -> Result<bool>;
    /// Removes every notification for a recipient, returning the removed ids.
    async fn delete_for_recipient(&self, recipient_id: &str) -> Result<Vec<Uuid>>;
    /// Newest first.
    async fn list_for_recipient(
        &self,
        recipient_id: &str,
        unread_only: bool,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Notification>>;
    /// First delivery timestamp wins; true when the flag changed.
    async fn mark_delivered(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool>;
    /// Idempotent; re-marking an already-read notification is a no-op.
    async fn mark_read(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool>;
    async fn mark_all_read(&self, recipient_id: &str, at: DateTime<Utc>) -> Result<u64>;
    async fn count_unread(&self, recipient_id: &str) -> Result<u64>;
}

#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn put(&self, record: QueuedDelivery) -> Result<()>;
    async fn delete(&self, notification_id: Uuid) -> Result<()>;
    async fn list(&self) -> Result<Vec<QueuedDelivery>>;
}

#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Never fails with not-found: absent recipients get defaults.
    async fn get(&self, recipient_id: &str) -> Result<UserPreferences>;
    async fn set(&self, prefs: UserPreferences) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryNotificationStore {
    inner: RwLock<HashMap<Uuid, Notification>>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn put(&self, notification: Notification) -> Result<()> {
        self.inner
            .write()
            .await
            .insert(notification.id, notification);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Notification>> {
        Ok(self.inner.read().await.get(&id).cloned())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.inner.write().await.remove(&id).is_some())
    }

    async fn delete_for_recipient(&self, recipient_id: &str) -> Result<Vec<Uuid>> {
        let mut map = self.inner.write().await;
        let ids: Vec<Uuid> = map
            .values()
            .filter(|n| n.recipient_id == recipient_id)
            .map(|n| n.id)
            .collect();
        for id in &ids {
            map.remove(id);
        }
        Ok(ids)
    }

    async fn list_for_recipient(
        &self,
        recipient_id: &str,
        unread_only: bool,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Notification>> {
        let map = self.inner.read().await;
        let mut items: Vec<Notification> = map
            .values()
            .filter(|n| n.recipient_id == recipient_id)
            .filter(|n| !unread_only || n.read_at.is_none())
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items.into_iter().skip(offset).take(limit).collect())
    }

    async fn mark_delivered(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let mut map = self.inner.write().await;
        match map.get_mut(&id) {
            Some(n) if n.delivered_at.is_none() => {
                n.delivered_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_read(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let mut map = self.inner.write().await;
        match map.get_mut(&id) {
            Some(n) if n.read_at.is_none() => {
                n.read_at = Some(at);
                if n.delivered_at.is_none() {
                    n.delivered_at = Some(at);
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_all_read(&self, recipient_id: &str, at: DateTime<Utc>) -> Result<u64> {
        let mut map = self.inner.write().await;
        let mut changed = 0u64;
        for n in map.values_mut() {
            if n.recipient_id == recipient_id && n.read_at.is_none() {
                n.read_at = Some(at);
                if n.delivered_at.is_none() {
                    n.delivered_at = Some(at);
                }
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn count_unread(&self, recipient_id: &str) -> Result<u64> {
        let map = self.inner.read().await;
        Ok(map
            .values()
            .filter(|n| n.recipient_id == recipient_id && n.read_at.is_none())
            .count() as u64)
    }
}

#[derive(Default)]
pub struct MemoryQueueStore {
    inner: RwLock<HashMap<Uuid, QueuedDelivery>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn put(&self, record: QueuedDelivery) -> Result<()> {
        self.inner
            .write()
            .await
            .insert(record.notification_id, record);
        Ok(())
    }

    async fn delete(&self, notification_id: Uuid) -> Result<()> {
        self.inner.write().await.remove(&notification_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<QueuedDelivery>> {
        Ok(self.inner.read().await.values().cloned().collect())
    }
}

#[derive(Default)]
pub struct MemoryPreferenceStore {
    inner: RwLock<HashMap<String, UserPreferences>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferenceStore {
    async fn get(&self, recipient_id: &str) -> Result<UserPreferences> {
        Ok(self
            .inner
            .read()
            .await
            .get(recipient_id)
            .cloned()
            .unwrap_or_else(|| UserPreferences::defaults_for(recipient_id)))
    }

    async fn set(&self, prefs: UserPreferences) -> Result<()> {
        self.inner
            .write()
            .await
            .insert(prefs.recipient_id.clone(), prefs);
        Ok(())
    }
}
