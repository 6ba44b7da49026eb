//! Durable delivery queue with per-recipient ordering.
//!
//! Records are partitioned into one lane per recipient and only the head of
//! a lane is ever handed out, so a later notification for the same user can
//! never overtake an earlier one that is still pending. Visibility and ack
//! deadlines make delivery at-least-once: a record handed out but never
//! resolved returns to the lane with backoff, and a record that keeps
//! failing is moved to the dead-letter set and never retried again.
//!
//! Record persistence goes through the [`QueueStore`] collaborator; the
//! in-memory scheduling state is rebuilt from it by [`DeliveryQueue::recover`]
//! after a restart.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing;
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::store::QueueStore;
use crate::types::{Channel, DeliveryState, QueuedDelivery};

struct QueueInner {
    records: HashMap<Uuid, QueuedDelivery>,
    /// Per-recipient FIFO of notification ids, oldest at the front.
    lanes: BTreeMap<String, VecDeque<Uuid>>,
    dead: Vec<QueuedDelivery>,
}

impl QueueInner {
    fn remove_record(&mut self, notification_id: Uuid) -> Option<QueuedDelivery> {
        let record = self.records.remove(&notification_id)?;
        if let Some(lane) = self.lanes.get_mut(&record.recipient_id) {
            lane.retain(|id| *id != notification_id);
            if lane.is_empty() {
                self.lanes.remove(&record.recipient_id);
            }
        }
        Some(record)
    }
}

pub struct DeliveryQueue {
    config: QueueConfig,
    redelivery: RetryPolicy,
    store: Arc<dyn QueueStore>,
    inner: Mutex<QueueInner>,
    wake_tx: UnboundedSender<String>,
    wake_rx: Mutex<Option<UnboundedReceiver<String>>>,
}

impl DeliveryQueue {
    pub fn new(config: QueueConfig, store: Arc<dyn QueueStore>) -> Self {
        let redelivery = RetryPolicy::new(
            config.max_attempts,
            std::time::Duration::from_millis(config.retry_initial_ms),
            std::time::Duration::from_millis(config.retry_max_ms),
        );
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();

        DeliveryQueue {
            config,
            redelivery,
            store,
            inner: Mutex::new(QueueInner {
                records: HashMap::new(),
                lanes: BTreeMap::new(),
                dead: Vec::new(),
            }),
            wake_tx,
            wake_rx: Mutex::new(Some(wake_rx)),
        }
    }

    /// Rebuilds lanes from the backing store after a restart. Every
    /// recovered record becomes immediately visible; redelivering something
    /// that was mid-flight when the process died is safe because the whole
    /// path is idempotent on notification id.
    pub async fn recover(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut records = self.store.list().await?;
        records.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at));

        let mut inner = self.inner.lock().unwrap();
        for mut record in records {
            record.state = DeliveryState::Ready { visible_at: now };
            inner
                .lanes
                .entry(record.recipient_id.clone())
                .or_default()
                .push_back(record.notification_id);
            inner.records.insert(record.notification_id, record);
        }

        Ok(inner.records.len())
    }

    /// Persists a record before any delivery attempt, then makes it visible.
    /// Once this returns the notification cannot be lost.
    pub async fn enqueue(
        &self,
        notification_id: Uuid,
        recipient_id: &str,
        channels: Vec<Channel>,
        now: DateTime<Utc>,
    ) -> Result<QueuedDelivery> {
        let record = QueuedDelivery {
            notification_id,
            recipient_id: recipient_id.to_string(),
            channels,
            enqueued_at: now,
            attempt_count: 0,
            state: DeliveryState::Ready { visible_at: now },
        };

        self.store.put(record.clone()).await?;

        {
            let mut inner = self.inner.lock().unwrap();
            inner
                .lanes
                .entry(record.recipient_id.clone())
                .or_default()
                .push_back(notification_id);
            inner.records.insert(notification_id, record.clone());
        }

        // Nudge the worker so an online recipient does not wait for a sweep.
        let _ = self.wake_tx.send(recipient_id.to_string());

        tracing::debug!(
            notification_id = %notification_id,
            recipient_id = %recipient_id,
            "delivery record enqueued"
        );

        Ok(record)
    }

    /// Hands out the next visible record, skipping lanes that already have a
    /// record in flight. Expired in-flight and pending-ack deadlines are
    /// reclaimed first, dead-lettering records that are out of attempts.
    pub async fn dequeue(&self, now: DateTime<Utc>) -> Option<QueuedDelivery> {
        let (result, dead) = {
            let mut inner = self.inner.lock().unwrap();
            let dead = self.reclaim_locked(&mut inner, now);

            let mut picked_id: Option<Uuid> = None;
            for lane in inner.lanes.values() {
                let Some(head) = lane.front() else { continue };
                if let Some(record) = inner.records.get(head) {
                    if let DeliveryState::Ready { visible_at } = record.state {
                        if visible_at <= now {
                            picked_id = Some(record.notification_id);
                            break;
                        }
                    }
                }
            }

            let picked = picked_id.map(|id| {
                let record = inner.records.get_mut(&id).unwrap();
                record.attempt_count += 1;
                record.state = DeliveryState::InFlight {
                    deadline: now + Duration::seconds(self.config.visibility_timeout_secs as i64),
                };
                record.clone()
            });

            (picked, dead)
        };

        self.flush_dead_letters(dead).await;
        result
    }

    /// Marks a published record as awaiting its client ack.
    pub fn published(&self, notification_id: Uuid, now: DateTime<Utc>) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.records.get_mut(&notification_id) {
            Some(record) => {
                record.state = DeliveryState::PendingAck {
                    deadline: now + Duration::seconds(self.config.ack_timeout_secs as i64),
                };
                true
            }
            None => false,
        }
    }

    /// Client acknowledgment: removes the record for good. Returns false for
    /// unknown ids (stale or replayed acks), which is not an error.
    pub async fn ack(&self, notification_id: Uuid) -> bool {
        let removed = {
            let mut inner = self.inner.lock().unwrap();
            inner.remove_record(notification_id)
        };

        match removed {
            Some(record) => {
                self.delete_from_store(notification_id).await;
                tracing::debug!(
                    notification_id = %notification_id,
                    recipient_id = %record.recipient_id,
                    attempts = record.attempt_count,
                    "delivery acknowledged"
                );
                true
            }
            None => false,
        }
    }

    /// Failed delivery attempt: schedules redelivery with backoff, or
    /// dead-letters the record once the attempt budget is spent.
    pub async fn nack(&self, notification_id: Uuid, now: DateTime<Utc>) {
        let dead = {
            let mut inner = self.inner.lock().unwrap();
            let attempts = match inner.records.get(&notification_id) {
                Some(record) => record.attempt_count,
                None => return,
            };

            if attempts >= self.config.max_attempts {
                let mut dead = Vec::new();
                if let Some(record) = inner.remove_record(notification_id) {
                    inner.dead.push(record.clone());
                    dead.push(record);
                }
                dead
            } else {
                let delay = self.redelivery.delay(attempts);
                if let Some(record) = inner.records.get_mut(&notification_id) {
                    record.state = DeliveryState::Ready {
                        visible_at: now + Duration::milliseconds(delay.as_millis() as i64),
                    };
                }
                Vec::new()
            }
        };

        self.flush_dead_letters(dead).await;
    }

    /// Recipient-offline path: the record goes back to its lane with no
    /// attempt penalty and parks until the next sweep or a reconnect wake.
    pub fn release(&self, notification_id: Uuid, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(record) = inner.records.get_mut(&notification_id) {
            record.attempt_count = record.attempt_count.saturating_sub(1);
            record.state = DeliveryState::Ready {
                visible_at: now + Duration::milliseconds(self.config.sweep_interval_ms as i64),
            };
        }
    }

    /// Reconnect-triggered flush: everything parked for this recipient
    /// becomes visible now and the worker is nudged.
    pub fn wake(&self, recipient_id: &str) {
        let now = Utc::now();
        {
            let mut inner = self.inner.lock().unwrap();
            let ids: Vec<Uuid> = inner
                .lanes
                .get(recipient_id)
                .map(|lane| lane.iter().copied().collect())
                .unwrap_or_default();
            for id in ids {
                if let Some(record) = inner.records.get_mut(&id) {
                    if let DeliveryState::Ready { .. } = record.state {
                        record.state = DeliveryState::Ready { visible_at: now };
                    }
                }
            }
        }
        let _ = self.wake_tx.send(recipient_id.to_string());
    }

    /// The worker calls this once to receive reconnect/enqueue nudges.
    pub fn take_wakeups(&self) -> Option<UnboundedReceiver<String>> {
        self.wake_rx.lock().unwrap().take()
    }

    /// User-initiated delete: removes the record and suppresses any
    /// in-flight delivery (a later ack for this id becomes a no-op).
    pub async fn remove(&self, notification_id: Uuid) -> bool {
        self.ack(notification_id).await
    }

    /// Clear-all: drops the recipient's entire lane.
    pub async fn remove_recipient(&self, recipient_id: &str) -> Vec<Uuid> {
        let ids = {
            let mut inner = self.inner.lock().unwrap();
            let ids: Vec<Uuid> = inner
                .lanes
                .remove(recipient_id)
                .map(|lane| lane.into_iter().collect())
                .unwrap_or_default();
            for id in &ids {
                inner.records.remove(id);
            }
            ids
        };

        for id in &ids {
            self.delete_from_store(*id).await;
        }

        ids
    }

    /// All outstanding records for a recipient in lane order (the offline
    /// backlog), regardless of scheduling state.
    pub fn pending_for(&self, recipient_id: &str) -> Vec<QueuedDelivery> {
        let inner = self.inner.lock().unwrap();
        inner
            .lanes
            .get(recipient_id)
            .map(|lane| {
                lane.iter()
                    .filter_map(|id| inner.records.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn dead_letters(&self) -> Vec<QueuedDelivery> {
        self.inner.lock().unwrap().dead.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns records whose attempts ran out while reclaiming expired
    /// deadlines; the caller deletes them from the store outside the lock.
    fn reclaim_locked(&self, inner: &mut QueueInner, now: DateTime<Utc>) -> Vec<QueuedDelivery> {
        let expired: Vec<Uuid> = inner
            .records
            .values()
            .filter(|record| match record.state {
                DeliveryState::InFlight { deadline } | DeliveryState::PendingAck { deadline } => {
                    deadline <= now
                }
                DeliveryState::Ready { .. } => false,
            })
            .map(|record| record.notification_id)
            .collect();

        let mut dead = Vec::new();
        for id in expired {
            let exhausted = inner.records[&id].attempt_count >= self.config.max_attempts;
            if exhausted {
                if let Some(record) = inner.remove_record(id) {
                    inner.dead.push(record.clone());
                    dead.push(record);
                }
            } else {
                let delay = self.redelivery.delay(inner.records[&id].attempt_count);
                let record = inner.records.get_mut(&id).unwrap();
                record.state = DeliveryState::Ready {
                    visible_at: now + Duration::milliseconds(delay.as_millis() as i64),
                };
            }
        }

        dead
    }

    async fn flush_dead_letters(&self, dead: Vec<QueuedDelivery>) {
        for record in dead {
            self.delete_from_store(record.notification_id).await;
            tracing::error!(
                notification_id = %record.notification_id,
                recipient_id = %record.recipient_id,
                attempts = record.attempt_count,
                "delivery attempts exhausted, record dead-lettered"
            );
        }
    }

    async fn delete_from_store(&self, notification_id: Uuid) {
        if let Err(e) = self.store.delete(notification_id).await {
            tracing::warn!(
                notification_id = %notification_id,
                "failed to delete queue record from store: {}",
                e
            );
        }
    }
}
