//! Scheduled delivery queue with a periodic background processor.
//!
//! Holds pending [`WebhookQueueItem`]s in storage and drives a single
//! timer-based scan that dispatches due items to a supplied callback. The
//! callback owns outcome handling — removing, rescheduling, or
//! dead-lettering items — the queue never interprets delivery results.
//!
//! A tick dispatches due items with bounded concurrency and fully drains
//! before the next scan starts, so one scan can never double-process an
//! item another scan is still working on.

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use hookrelay_core::{Clock, DeliveryStore, WebhookQueueItem, QueueItemId};
use serde::{Deserialize, Serialize};
use tokio::{sync::Mutex, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::Result;

/// Callback invoked for each due queue item.
pub type QueueCallback =
    Arc<dyn Fn(WebhookQueueItem) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Configuration for the queue processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Interval between scans for due items.
    pub scan_interval: Duration,
    /// Maximum callback invocations in flight within one tick.
    pub max_concurrent_dispatch: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { scan_interval: Duration::from_secs(1), max_concurrent_dispatch: 8 }
    }
}

struct ProcessorHandle {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

/// Manages the pending delivery queue and its background processor.
pub struct QueueManager {
    store: Arc<dyn DeliveryStore>,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    processor: Mutex<Option<ProcessorHandle>>,
}

impl QueueManager {
    /// Creates a queue manager over the given store.
    pub fn new(store: Arc<dyn DeliveryStore>, config: QueueConfig, clock: Arc<dyn Clock>) -> Self {
        Self { store, config, clock, processor: Mutex::new(None) }
    }

    /// Appends an item to the pending queue.
    pub async fn enqueue(&self, item: WebhookQueueItem) -> Result<()> {
        debug!(
            item_id = %item.id,
            webhook_id = %item.webhook_id,
            scheduled_for = %item.scheduled_for,
            "enqueueing webhook delivery"
        );
        self.store.add_to_queue(item).await?;
        Ok(())
    }

    /// Removes and returns the oldest queued item, FIFO by insertion.
    pub async fn dequeue(&self) -> Result<Option<WebhookQueueItem>> {
        let items = self.store.queue_items().await?;
        let Some(first) = items.into_iter().next() else {
            return Ok(None);
        };
        self.store.remove_from_queue(first.id).await?;
        Ok(Some(first))
    }

    /// Returns all pending items in insertion order.
    pub async fn pending_items(&self) -> Result<Vec<WebhookQueueItem>> {
        Ok(self.store.queue_items().await?)
    }

    /// Removes an item by ID. Returns whether it existed.
    pub async fn remove(&self, id: QueueItemId) -> Result<bool> {
        Ok(self.store.remove_from_queue(id).await?)
    }

    /// Earliest `scheduled_for` across pending items.
    pub async fn next_scheduled(&self) -> Result<Option<DateTime<Utc>>> {
        let items = self.store.queue_items().await?;
        Ok(items.iter().map(|item| item.scheduled_for).min())
    }

    /// Whether the background processor is currently running.
    pub async fn is_processor_running(&self) -> bool {
        self.processor.lock().await.as_ref().is_some_and(|p| !p.task.is_finished())
    }

    /// Starts the periodic processor with the given callback.
    ///
    /// Idempotent: a second start while the processor runs is a no-op, so
    /// there is never more than one scan timer.
    pub async fn start_processor(&self, callback: QueueCallback) {
        let mut slot = self.processor.lock().await;
        if slot.as_ref().is_some_and(|p| !p.task.is_finished()) {
            return;
        }

        info!(
            scan_interval_ms = self.config.scan_interval.as_millis() as u64,
            "starting queue processor"
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_processor(
            self.store.clone(),
            self.config.clone(),
            self.clock.clone(),
            callback,
            cancel.clone(),
        ));

        *slot = Some(ProcessorHandle { cancel, task });
    }

    /// Stops the processor and waits for the current tick to drain.
    ///
    /// No callback fires after this returns. Queued items stay in storage
    /// and resume processing on the next start.
    pub async fn stop_processor(&self) {
        let handle = self.processor.lock().await.take();
        if let Some(handle) = handle {
            handle.cancel.cancel();
            if handle.task.await.is_err() {
                error!("queue processor task panicked during shutdown");
            }
            info!("queue processor stopped");
        }
    }
}

/// Processor loop: scan, dispatch due items, sleep, repeat until cancelled.
async fn run_processor(
    store: Arc<dyn DeliveryStore>,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    callback: QueueCallback,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        match store.queue_items().await {
            Ok(items) => {
                let now = clock.now_utc();
                let mut due: Vec<WebhookQueueItem> =
                    items.into_iter().filter(|item| item.is_due(now)).collect();
                // Higher priority first among due items; creation order
                // breaks remaining ties.
                due.sort_by(|a, b| {
                    b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at))
                });

                if !due.is_empty() {
                    debug!(due_count = due.len(), "dispatching due queue items");
                    dispatch(due, &callback, config.max_concurrent_dispatch).await;
                }
            },
            Err(e) => {
                error!(error = %e, "queue scan failed");
            },
        }

        tokio::select! {
            () = clock.sleep(config.scan_interval) => {},
            () = cancel.cancelled() => break,
        }
    }
}

/// Runs callbacks for due items with bounded concurrency, draining fully
/// before returning so slow destinations cannot leak into the next tick.
async fn dispatch(due: Vec<WebhookQueueItem>, callback: &QueueCallback, max_concurrent: usize) {
    let mut in_flight = JoinSet::new();

    for item in due {
        while in_flight.len() >= max_concurrent.max(1) {
            let _ = in_flight.join_next().await;
        }
        let callback = callback.clone();
        in_flight.spawn(async move { callback(item).await });
    }

    while in_flight.join_next().await.is_some() {}
}
