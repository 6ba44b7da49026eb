//! Delivery worker: drives queued records through
//! `Queued → Published → PendingAck`, leaving acks, reads and dead-letters
//! to the queue and the notification service.

use anyhow::{anyhow, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing;

use courier_core::types::{Channel, QueuedDelivery};
use courier_core::CourierContext;

use crate::channels::{ChannelSink, TracingSink};

/// Entry point used by the runner.
pub async fn run(ctx: CourierContext) -> Result<()> {
    DeliveryWorker::new(ctx).run().await
}

pub struct DeliveryWorker {
    ctx: CourierContext,
    sink: Arc<dyn ChannelSink>,
}

impl DeliveryWorker {
    pub fn new(ctx: CourierContext) -> Self {
        Self::with_sink(ctx, Arc::new(TracingSink))
    }

    pub fn with_sink(ctx: CourierContext, sink: Arc<dyn ChannelSink>) -> Self {
        DeliveryWorker { ctx, sink }
    }

    /// Runs forever: drains the queue on every sweep tick and whenever a
    /// reconnecting session (or a fresh enqueue) nudges it.
    pub async fn run(&self) -> Result<()> {
        tracing::info!("starting delivery worker");

        let mut wakeups = self
            .ctx
            .queue
            .take_wakeups()
            .ok_or_else(|| anyhow!("delivery worker already running for this queue"))?;

        let sweep_interval = Duration::from_millis(self.ctx.config.queue.sweep_interval_ms);
        let mut sweep = tokio::time::interval(sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = sweep.tick() => {}
                wake = wakeups.recv() => {
                    if wake.is_none() {
                        return Err(anyhow!("queue wake channel closed"));
                    }
                }
            }

            self.drain().await;
        }
    }

    /// Processes everything currently visible. Returns the number of records
    /// handled in this pass.
    pub async fn drain(&self) -> usize {
        let mut processed = 0;
        while let Some(record) = self.ctx.queue.dequeue(Utc::now()).await {
            self.process(record).await;
            processed += 1;
        }
        processed
    }

    async fn process(&self, record: QueuedDelivery) {
        let now = Utc::now();

        let notification = match self.ctx.store.get(record.notification_id).await {
            Ok(Some(notification)) => notification,
            Ok(None) => {
                // Deleted while queued: settle the record quietly.
                self.ctx.queue.remove(record.notification_id).await;
                return;
            }
            Err(e) => {
                tracing::warn!(
                    notification_id = %record.notification_id,
                    "store lookup failed, scheduling redelivery: {}",
                    e
                );
                self.ctx.queue.nack(record.notification_id, now).await;
                return;
            }
        };

        let live = self.ctx.registry.lookup(&record.recipient_id);
        if live.is_empty() {
            // Offline: the queue is the offline store. The record parks with
            // no attempt penalty until the next sweep or a reconnect wake.
            self.ctx.queue.release(record.notification_id, now);
            return;
        }

        // Secondary channels go out once, on the first attempt; redeliveries
        // only chase the in-app ack.
        if record.attempt_count == 1 {
            for channel in &record.channels {
                if *channel == Channel::InApp {
                    continue;
                }
                if let Err(e) = self.sink.deliver(*channel, &notification).await {
                    tracing::warn!(
                        notification_id = %notification.id,
                        channel = ?channel,
                        "secondary channel delivery failed: {}",
                        e
                    );
                }
            }
        }

        let subscribers = self
            .ctx
            .fanout
            .publish(&record.recipient_id, Arc::new(notification));

        if subscribers == 0 {
            // The registry said online but no session on this process is
            // subscribed; treat as offline rather than burning an attempt.
            self.ctx.queue.release(record.notification_id, now);
        } else {
            self.ctx.queue.published(record.notification_id, now);
            tracing::debug!(
                notification_id = %record.notification_id,
                recipient_id = %record.recipient_id,
                subscribers,
                attempt = record.attempt_count,
                "notification published, awaiting ack"
            );
        }
    }
}
