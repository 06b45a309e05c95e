//! Best-effort publication of domain events.
//!
//! Events go out after the change they describe has been committed. A
//! publish failure is logged and otherwise ignored; it never turns a
//! committed operation into a failed one.

use tracing::{debug, warn};

use crate::domain::events::DomainEvent;

#[derive(Clone, Default)]
pub struct EventPublisher {
    nats: Option<async_nats::Client>,
    prefix: String,
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("nats", &self.nats.is_some())
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl EventPublisher {
    pub fn new(nats: Option<async_nats::Client>, prefix: impl Into<String>) -> Self {
        Self { nats, prefix: prefix.into() }
    }

    /// A publisher that only logs.
    pub fn disabled() -> Self { Self::default() }

    pub fn subject_for(&self, event: &DomainEvent) -> String {
        if self.prefix.is_empty() {
            event.subject().to_string()
        } else {
            format!("{}.{}", self.prefix, event.subject())
        }
    }

    pub async fn publish(&self, event: DomainEvent) {
        let subject = self.subject_for(&event);
        debug!(%subject, ?event, "domain event");
        let Some(client) = &self.nats else { return };
        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(%subject, error = %e, "could not encode event");
                return;
            }
        };
        if let Err(e) = client.publish(subject.clone(), payload.into()).await {
            warn!(%subject, error = %e, "could not publish event");
        }
    }

    pub async fn publish_all(&self, events: impl IntoIterator<Item = DomainEvent>) {
        for event in events {
            self.publish(event).await;
        }
    }
}
