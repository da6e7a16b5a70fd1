//! Dead-letter capture and replay for exhausted deliveries.
//!
//! Queue items that spend their retry budget land here as durable
//! [`DeadLetterWebhook`] records instead of being dropped. Operators can
//! inspect them, delete them, or replay them back into the delivery queue
//! with a fresh retry budget.

use std::{future::Future, sync::Arc};

use hookrelay_core::{
    Clock, DeadLetterId, DeadLetterWebhook, DeliveryStatus, DeliveryStore, Webhook, WebhookId,
    WebhookQueueItem, QueueItemId,
};
use tracing::{info, warn};

use crate::error::{DeliveryError, Result};

/// Manages the dead-letter store.
pub struct DeadLetterManager {
    store: Arc<dyn DeliveryStore>,
    clock: Arc<dyn Clock>,
}

impl DeadLetterManager {
    /// Creates a manager over the given store.
    pub fn new(store: Arc<dyn DeliveryStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Captures an exhausted queue item as a dead-letter record.
    ///
    /// The caller must already have removed the item from the live queue;
    /// an item never exists in both places. The most recent failed delivery
    /// records, bounded by the item's retry count, are attached as
    /// evidence.
    pub async fn add(
        &self,
        item: &WebhookQueueItem,
        webhook: &Webhook,
        error: &DeliveryError,
    ) -> Result<DeadLetterWebhook> {
        let evidence = self.trailing_failures(webhook.id, item.retry_count as usize).await?;

        let record = DeadLetterWebhook {
            id: DeadLetterId::new(),
            webhook_id: webhook.id,
            event: item.event.clone(),
            payload: item.payload.clone(),
            failure_reason: format!(
                "delivery failed after {} attempts: {error}",
                item.retry_count
            ),
            last_attempt_at: self.clock.now_utc(),
            original_created_at: item.created_at,
            attempts: evidence,
        };

        warn!(
            dead_letter_id = %record.id,
            webhook_id = %webhook.id,
            event = %item.event,
            retry_count = item.retry_count,
            "delivery exhausted retries, moving to dead letter queue"
        );

        self.store.add_dead_letter(record.clone()).await?;
        Ok(record)
    }

    /// Deletes a dead-letter record. Returns whether it existed.
    pub async fn remove(&self, id: DeadLetterId) -> Result<bool> {
        Ok(self.store.remove_dead_letter(id).await?)
    }

    /// Returns all dead-letter records.
    pub async fn list(&self) -> Result<Vec<DeadLetterWebhook>> {
        Ok(self.store.dead_letters().await?)
    }

    /// Looks up a dead-letter record by ID.
    pub async fn find(&self, id: DeadLetterId) -> Result<Option<DeadLetterWebhook>> {
        Ok(self.store.find_dead_letter(id).await?)
    }

    /// Returns dead-letter records for one webhook.
    pub async fn list_for_webhook(&self, webhook_id: WebhookId) -> Result<Vec<DeadLetterWebhook>> {
        let records = self.store.dead_letters().await?;
        Ok(records.into_iter().filter(|r| r.webhook_id == webhook_id).collect())
    }

    /// Number of dead-letter records.
    pub async fn count(&self) -> Result<usize> {
        Ok(self.store.dead_letters().await?.len())
    }

    /// Deletes every dead-letter record.
    pub async fn clear(&self) -> Result<()> {
        for record in self.store.dead_letters().await? {
            self.store.remove_dead_letter(record.id).await?;
        }
        Ok(())
    }

    /// Replays a dead-letter record back into the delivery queue.
    ///
    /// Returns `false` without mutating anything when the record is absent
    /// or its webhook no longer exists. Otherwise removes the record,
    /// builds a fresh queue item with a new ID and `retry_count` reset to
    /// zero — the only path that ever resets a retry count — and hands it
    /// to `enqueue`.
    pub async fn retry<F, Fut>(&self, id: DeadLetterId, enqueue: F) -> Result<bool>
    where
        F: FnOnce(WebhookQueueItem) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let Some(record) = self.store.find_dead_letter(id).await? else {
            return Ok(false);
        };

        if self.store.find_webhook(record.webhook_id).await?.is_none() {
            warn!(
                dead_letter_id = %id,
                webhook_id = %record.webhook_id,
                "cannot replay dead letter, webhook no longer exists"
            );
            return Ok(false);
        }

        self.store.remove_dead_letter(id).await?;

        let item = WebhookQueueItem {
            id: QueueItemId::new(),
            webhook_id: record.webhook_id,
            event: record.event,
            payload: record.payload,
            priority: 0,
            scheduled_for: self.clock.now_utc(),
            created_at: self.clock.now_utc(),
            retry_count: 0,
            max_retries: crate::DEFAULT_MAX_RETRIES,
        };

        info!(
            dead_letter_id = %id,
            item_id = %item.id,
            webhook_id = %item.webhook_id,
            "replaying dead letter into delivery queue"
        );

        enqueue(item).await?;
        Ok(true)
    }

    /// Most recent failed delivery records for a webhook, oldest first.
    async fn trailing_failures(
        &self,
        webhook_id: WebhookId,
        limit: usize,
    ) -> Result<Vec<hookrelay_core::WebhookDelivery>> {
        let mut failures: Vec<_> = self
            .store
            .deliveries_for_webhook(webhook_id)
            .await?
            .into_iter()
            .filter(|d| d.status == DeliveryStatus::Failed)
            .collect();

        let keep_from = failures.len().saturating_sub(limit);
        Ok(failures.split_off(keep_from))
    }
}
