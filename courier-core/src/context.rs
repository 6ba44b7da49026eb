use chrono::Utc;
use std::sync::Arc;
use tracing;
use uuid::Uuid;

use crate::config::Config;
use crate::error::Result;
use crate::fanout::FanoutBroadcaster;
use crate::queue::DeliveryQueue;
use crate::registry::ConnectionRegistry;
use crate::store::{
    MemoryNotificationStore, MemoryPreferenceStore, MemoryQueueStore, NotificationStore,
    PreferenceStore, QueueStore,
};

/// Shared handle to every pipeline component; cheap to clone, one per
/// process. `instance_id` identifies this server process in the connection
/// registry.
#[derive(Clone)]
pub struct CourierContext {
    pub config: Arc<Config>,
    pub instance_id: String,
    pub store: Arc<dyn NotificationStore>,
    pub prefs: Arc<dyn PreferenceStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub fanout: Arc<FanoutBroadcaster>,
    pub queue: Arc<DeliveryQueue>,
}

impl CourierContext {
    /// Context backed by the in-memory stores.
    pub async fn new(config: Config) -> Result<Self> {
        Self::with_stores(
            config,
            Arc::new(MemoryNotificationStore::new()),
            Arc::new(MemoryPreferenceStore::new()),
            Arc::new(MemoryQueueStore::new()),
        )
        .await
    }

    /// Context over caller-provided store implementations. Recovers any
    /// queue records the previous process left behind.
    pub async fn with_stores(
        config: Config,
        store: Arc<dyn NotificationStore>,
        prefs: Arc<dyn PreferenceStore>,
        queue_store: Arc<dyn QueueStore>,
    ) -> Result<Self> {
        let instance_id = Uuid::new_v4().to_string();
        let registry = Arc::new(ConnectionRegistry::new(&config.registry));
        let fanout = Arc::new(FanoutBroadcaster::new(&config.fanout));
        let queue = Arc::new(DeliveryQueue::new(config.queue.clone(), queue_store));

        let recovered = queue.recover(Utc::now()).await?;
        if recovered > 0 {
            tracing::info!(recovered, "recovered queued deliveries from store");
        }

        tracing::info!(instance_id = %instance_id, "courier context initialized");

        Ok(CourierContext {
            config: Arc::new(config),
            instance_id,
            store,
            prefs,
            registry,
            fanout,
            queue,
        })
    }
}
