//! Notification adapters

use async_trait::async_trait;
use crate::domain::events::DomainEvent;
use crate::domain::value_objects::OwnerId;
use crate::ports::{Notifier, NotifyError};

/// Publishes each event as JSON on `{prefix}.{owner}.{stream}`.
#[derive(Clone, Debug)]
pub struct NatsNotifier {
    client: async_nats::Client,
    prefix: String,
}

impl NatsNotifier {
    pub fn new(client: async_nats::Client, prefix: impl Into<String>) -> Self {
        Self { client, prefix: prefix.into() }
    }

    pub fn subject(&self, owner: OwnerId, event: &DomainEvent) -> String {
        format!("{}.{}.{}", self.prefix, owner, event.stream())
    }
}

#[async_trait]
impl Notifier for NatsNotifier {
    async fn publish(&self, owner: OwnerId, event: &DomainEvent) -> Result<(), NotifyError> {
        let payload = serde_json::to_vec(event).map_err(|e| NotifyError(e.to_string()))?;
        self.client.publish(self.subject(owner, event), payload.into()).await
            .map_err(|e| NotifyError(e.to_string()))
    }
}

/// Used when no broker is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn publish(&self, owner: OwnerId, event: &DomainEvent) -> Result<(), NotifyError> {
        tracing::trace!(%owner, stream = event.stream(), "notification dropped, no broker configured");
        Ok(())
    }
}
