//! In-memory reference implementation of the storage interface.
//!
//! All state lives behind a single `RwLock`, so every read-modify-write is
//! atomic at item granularity. Suitable for single-process deployments and
//! tests; durability requires a database-backed implementor of the same
//! trait.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{DeliveryStore, StoreFuture};
use crate::{
    error::CoreError,
    models::{
        DeadLetterId, DeadLetterWebhook, DeliveryId, DeliveryPatch, DeliveryStatus, Webhook,
        WebhookDelivery, WebhookId, WebhookPatch, WebhookQueueItem, QueueItemId,
    },
};

#[derive(Default)]
struct Inner {
    webhooks: HashMap<WebhookId, Webhook>,
    deliveries: Vec<WebhookDelivery>,
    queue: Vec<WebhookQueueItem>,
    dead_letters: Vec<DeadLetterWebhook>,
}

/// In-memory [`DeliveryStore`].
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeliveryStore for MemoryStore {
    fn webhooks(&self) -> StoreFuture<'_, Vec<Webhook>> {
        Box::pin(async move {
            let inner = self.inner.read().await;
            let mut webhooks: Vec<Webhook> = inner.webhooks.values().cloned().collect();
            webhooks.sort_by_key(|w| w.created_at);
            Ok(webhooks)
        })
    }

    fn find_webhook(&self, id: WebhookId) -> StoreFuture<'_, Option<Webhook>> {
        Box::pin(async move { Ok(self.inner.read().await.webhooks.get(&id).cloned()) })
    }

    fn create_webhook(&self, webhook: Webhook) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut inner = self.inner.write().await;
            if inner.webhooks.contains_key(&webhook.id) {
                return Err(CoreError::ConstraintViolation(format!(
                    "webhook {} already exists",
                    webhook.id
                )));
            }
            inner.webhooks.insert(webhook.id, webhook);
            Ok(())
        })
    }

    fn update_webhook(&self, id: WebhookId, patch: WebhookPatch) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut inner = self.inner.write().await;
            let webhook = inner
                .webhooks
                .get_mut(&id)
                .ok_or_else(|| CoreError::not_found(format!("webhook {id}")))?;

            if let Some(url) = patch.url {
                webhook.url = url;
            }
            if let Some(events) = patch.events {
                webhook.events = events;
            }
            if let Some(is_active) = patch.is_active {
                webhook.is_active = is_active;
            }
            if let Some(secret) = patch.secret {
                webhook.secret = secret;
            }
            Ok(())
        })
    }

    fn delete_webhook(&self, id: WebhookId) -> StoreFuture<'_, bool> {
        Box::pin(async move { Ok(self.inner.write().await.webhooks.remove(&id).is_some()) })
    }

    fn webhooks_for_event(&self, event: &str) -> StoreFuture<'_, Vec<Webhook>> {
        let event = event.to_owned();
        Box::pin(async move {
            let inner = self.inner.read().await;
            let mut webhooks: Vec<Webhook> = inner
                .webhooks
                .values()
                .filter(|w| w.subscribes_to(&event))
                .cloned()
                .collect();
            webhooks.sort_by_key(|w| w.created_at);
            Ok(webhooks)
        })
    }

    fn record_webhook_outcome(
        &self,
        id: WebhookId,
        status: DeliveryStatus,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut inner = self.inner.write().await;
            let webhook = inner
                .webhooks
                .get_mut(&id)
                .ok_or_else(|| CoreError::not_found(format!("webhook {id}")))?;

            webhook.delivery_count += 1;
            if status == DeliveryStatus::Failed {
                webhook.failure_count += 1;
            }
            webhook.last_delivery_at = Some(at);
            webhook.last_delivery_status = Some(status);
            Ok(())
        })
    }

    fn create_delivery(&self, delivery: WebhookDelivery) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.inner.write().await.deliveries.push(delivery);
            Ok(())
        })
    }

    fn find_delivery(&self, id: DeliveryId) -> StoreFuture<'_, Option<WebhookDelivery>> {
        Box::pin(async move {
            Ok(self.inner.read().await.deliveries.iter().find(|d| d.id == id).cloned())
        })
    }

    fn update_delivery(&self, id: DeliveryId, patch: DeliveryPatch) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut inner = self.inner.write().await;
            let delivery = inner
                .deliveries
                .iter_mut()
                .find(|d| d.id == id)
                .ok_or_else(|| CoreError::not_found(format!("delivery {id}")))?;

            if let Some(status) = patch.status {
                delivery.status = status;
            }
            if let Some(code) = patch.response_code {
                delivery.response_code = Some(code);
            }
            if let Some(message) = patch.response_message {
                delivery.response_message = Some(message);
            }
            Ok(())
        })
    }

    fn deliveries_for_webhook(&self, id: WebhookId) -> StoreFuture<'_, Vec<WebhookDelivery>> {
        Box::pin(async move {
            let inner = self.inner.read().await;
            Ok(inner.deliveries.iter().filter(|d| d.webhook_id == id).cloned().collect())
        })
    }

    fn add_to_queue(&self, item: WebhookQueueItem) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.inner.write().await.queue.push(item);
            Ok(())
        })
    }

    fn queue_items(&self) -> StoreFuture<'_, Vec<WebhookQueueItem>> {
        Box::pin(async move { Ok(self.inner.read().await.queue.clone()) })
    }

    fn remove_from_queue(&self, id: QueueItemId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut inner = self.inner.write().await;
            let before = inner.queue.len();
            inner.queue.retain(|item| item.id != id);
            Ok(inner.queue.len() < before)
        })
    }

    fn add_dead_letter(&self, record: DeadLetterWebhook) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.inner.write().await.dead_letters.push(record);
            Ok(())
        })
    }

    fn dead_letters(&self) -> StoreFuture<'_, Vec<DeadLetterWebhook>> {
        Box::pin(async move { Ok(self.inner.read().await.dead_letters.clone()) })
    }

    fn remove_dead_letter(&self, id: DeadLetterId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut inner = self.inner.write().await;
            let before = inner.dead_letters.len();
            inner.dead_letters.retain(|record| record.id != id);
            Ok(inner.dead_letters.len() < before)
        })
    }

    fn find_dead_letter(&self, id: DeadLetterId) -> StoreFuture<'_, Option<DeadLetterWebhook>> {
        Box::pin(async move {
            Ok(self.inner.read().await.dead_letters.iter().find(|r| r.id == id).cloned())
        })
    }
}
