use async_trait::async_trait;
use tracing;

use courier_core::types::{Channel, Notification};

/// Handoff point for channels other than the in-app stream. Deployments
/// plug their push/email providers in here; failures are logged and the
/// in-app delivery proceeds regardless.
#[async_trait]
pub trait ChannelSink: Send + Sync {
    async fn deliver(&self, channel: Channel, notification: &Notification) -> anyhow::Result<()>;
}

/// Default sink: records the handoff and nothing more.
pub struct TracingSink;

#[async_trait]
impl ChannelSink for TracingSink {
    async fn deliver(&self, channel: Channel, notification: &Notification) -> anyhow::Result<()> {
        tracing::info!(
            channel = ?channel,
            notification_id = %notification.id,
            recipient_id = %notification.recipient_id,
            "secondary channel handoff"
        );
        Ok(())
    }
}
