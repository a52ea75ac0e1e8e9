//! Domain events
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum DomainEvent {
    Order(OrderEvent),
    Catalog(CatalogEvent),
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrderEvent {
    Created { order_id: Uuid, number: String, total: Decimal },
    StatusChanged { order_id: Uuid, number: String, from: String, to: String },
    PaymentUpdated { order_id: Uuid, number: String, payment_id: String, payment_status: Option<String> },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CatalogEvent {
    Imported { categories_created: u32, products_created: u32, products_updated: u32 },
}

impl DomainEvent {
    /// NATS subject the event is published on.
    pub fn subject(&self) -> &'static str {
        match self {
            DomainEvent::Order(OrderEvent::Created { .. }) => "storefront.order.created",
            DomainEvent::Order(OrderEvent::StatusChanged { .. }) => "storefront.order.status_changed",
            DomainEvent::Order(OrderEvent::PaymentUpdated { .. }) => "storefront.order.payment_updated",
            DomainEvent::Catalog(CatalogEvent::Imported { .. }) => "storefront.catalog.imported",
        }
    }
}

/// Publishes domain events to NATS when a client is configured.
#[derive(Clone, Default)]
pub struct EventPublisher {
    nats: Option<async_nats::Client>,
}

impl EventPublisher {
    pub fn new(nats: Option<async_nats::Client>) -> Self { Self { nats } }

    pub async fn publish(&self, event: DomainEvent) {
        let Some(client) = &self.nats else {
            tracing::debug!(subject = event.subject(), "no NATS client, dropping event");
            return;
        };
        let payload = match serde_json::to_vec(&event) {
            Ok(p) => p,
            Err(e) => { tracing::error!(error = %e, "failed to encode event"); return; }
        };
        if let Err(e) = client.publish(event.subject().to_string(), payload.into()).await {
            tracing::warn!(subject = event.subject(), error = %e, "failed to publish event");
        }
    }

    pub async fn publish_all(&self, events: Vec<DomainEvent>) {
        for event in events { self.publish(event).await; }
    }
}
