//! Storage interface consumed by the delivery core.
//!
//! The delivery pipeline never talks to a persistence technology directly;
//! it goes through [`DeliveryStore`], which covers webhook registrations,
//! the delivery audit trail, the pending queue, and the dead-letter store.
//! The in-memory [`memory::MemoryStore`] is the reference implementation;
//! a database-backed adapter implements the same trait without touching
//! delivery logic.

use std::{future::Future, pin::Pin};

use chrono::{DateTime, Utc};

use crate::{
    error::Result,
    models::{
        DeadLetterId, DeadLetterWebhook, DeliveryId, DeliveryPatch, DeliveryStatus, Webhook,
        WebhookDelivery, WebhookId, WebhookPatch, WebhookQueueItem, QueueItemId,
    },
};

pub mod memory;

pub use memory::MemoryStore;

/// Boxed future returned by storage operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Durable (or in-memory) store for webhook delivery state.
///
/// Every read-modify-write must be atomic at item granularity: concurrent
/// queue ticks and synchronous deliveries touch the same webhook's counters
/// and must not lose updates.
pub trait DeliveryStore: Send + Sync + 'static {
    /// Returns all webhook registrations.
    fn webhooks(&self) -> StoreFuture<'_, Vec<Webhook>>;

    /// Looks up a webhook by ID.
    fn find_webhook(&self, id: WebhookId) -> StoreFuture<'_, Option<Webhook>>;

    /// Persists a new webhook registration.
    ///
    /// Fails with a constraint violation if the ID already exists.
    fn create_webhook(&self, webhook: Webhook) -> StoreFuture<'_, ()>;

    /// Applies a partial update to registration-side webhook fields.
    fn update_webhook(&self, id: WebhookId, patch: WebhookPatch) -> StoreFuture<'_, ()>;

    /// Deletes a webhook registration. Returns whether it existed.
    fn delete_webhook(&self, id: WebhookId) -> StoreFuture<'_, bool>;

    /// Returns active webhooks subscribed to the given event type.
    fn webhooks_for_event(&self, event: &str) -> StoreFuture<'_, Vec<Webhook>>;

    /// Atomically records an attempt outcome on the webhook's rolling
    /// counters and last-delivery metadata.
    ///
    /// `delivery_count` always increments; `failure_count` increments only
    /// for [`DeliveryStatus::Failed`].
    fn record_webhook_outcome(
        &self,
        id: WebhookId,
        status: DeliveryStatus,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, ()>;

    /// Persists a delivery attempt record.
    fn create_delivery(&self, delivery: WebhookDelivery) -> StoreFuture<'_, ()>;

    /// Looks up a delivery record by ID.
    fn find_delivery(&self, id: DeliveryId) -> StoreFuture<'_, Option<WebhookDelivery>>;

    /// Applies a partial update to a delivery record.
    fn update_delivery(&self, id: DeliveryId, patch: DeliveryPatch) -> StoreFuture<'_, ()>;

    /// Returns delivery records for a webhook, oldest first.
    fn deliveries_for_webhook(&self, id: WebhookId) -> StoreFuture<'_, Vec<WebhookDelivery>>;

    /// Appends an item to the pending queue.
    fn add_to_queue(&self, item: WebhookQueueItem) -> StoreFuture<'_, ()>;

    /// Returns all queued items in insertion order.
    fn queue_items(&self) -> StoreFuture<'_, Vec<WebhookQueueItem>>;

    /// Removes a queue item by ID. Returns whether it existed.
    fn remove_from_queue(&self, id: QueueItemId) -> StoreFuture<'_, bool>;

    /// Appends a record to the dead-letter store.
    fn add_dead_letter(&self, record: DeadLetterWebhook) -> StoreFuture<'_, ()>;

    /// Returns all dead-letter records in insertion order.
    fn dead_letters(&self) -> StoreFuture<'_, Vec<DeadLetterWebhook>>;

    /// Removes a dead-letter record by ID. Returns whether it existed.
    fn remove_dead_letter(&self, id: DeadLetterId) -> StoreFuture<'_, bool>;

    /// Looks up a dead-letter record by ID.
    fn find_dead_letter(&self, id: DeadLetterId) -> StoreFuture<'_, Option<DeadLetterWebhook>>;
}
