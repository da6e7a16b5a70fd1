//! Top-level delivery engine combining every reliability mechanism.
//!
//! This is what producers call. The engine wires the retry executor,
//! per-destination circuit breakers, and the delivery executor into a
//! synchronous path, and the queue manager plus dead-letter manager into an
//! asynchronous path with bounded retries.
//!
//! # Failure visibility asymmetry
//!
//! The two paths report failure differently, which is a common source of
//! integration bugs:
//!
//! - [`DeliveryMode::Immediate`] resolves to `Ok(false)` when delivery
//!   ultimately fails (retries exhausted, circuit open, permanent error).
//!   `Err` is reserved for programming errors: unknown webhook or storage
//!   failure.
//! - [`DeliveryMode::Queued`] resolves to `Ok(true)` as soon as the item is
//!   accepted — acceptance is not delivery confirmation. Outcomes are
//!   observable only through delivery records, [`DeliveryEngine::queue_stats`],
//!   and dead-letter inspection.
//!
//! # Ordering
//!
//! Delivery is at-least-once with no cross-event ordering guarantee to the
//! same webhook: an event that retries can be overtaken by a later event
//! that succeeds immediately. Subscribers must deduplicate and tolerate
//! reordering.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use hookrelay_core::{
    Clock, DeadLetterId, DeliveryStore, Webhook, WebhookId, WebhookPayload, WebhookQueueItem,
    QueueItemId,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info};

use crate::{
    backoff::{self, Jitter},
    circuit::{CircuitBreakerConfig, CircuitRegistry, CircuitStats},
    dead_letter::DeadLetterManager,
    error::{DeliveryError, Result},
    executor::{DeliveryExecutor, ExecutorConfig},
    queue::{QueueCallback, QueueConfig, QueueManager},
    retry::{http_retryable, RetryConfig, RetryExecutor},
};

/// Configuration for the delivery engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// HTTP executor configuration.
    pub executor: ExecutorConfig,

    /// Circuit breaker thresholds applied per destination.
    pub circuit: CircuitBreakerConfig,

    /// Queue processor configuration.
    pub queue: QueueConfig,

    /// Backoff base delay for queued redelivery scheduling.
    pub queue_base_delay: Duration,

    /// Ceiling on any computed backoff delay, both paths.
    pub max_backoff_delay: Duration,

    /// Exponential backoff growth factor.
    pub backoff_multiplier: f64,

    /// Jitter applied to computed backoff delays.
    pub jitter: Jitter,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorConfig::default(),
            circuit: CircuitBreakerConfig::default(),
            queue: QueueConfig::default(),
            queue_base_delay: Duration::from_secs(1),
            max_backoff_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            jitter: Jitter::default(),
        }
    }
}

/// How a delivery request should be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeliveryMode {
    /// Deliver inline with retries; the result reflects the final outcome.
    #[default]
    Immediate,
    /// Enqueue for background delivery; the result means "accepted".
    Queued,
}

/// Per-call delivery options.
#[derive(Debug, Clone)]
pub struct DeliveryOptions {
    /// Attempt ceiling: total attempts for the immediate path, queue
    /// retries before dead-lettering for the queued path.
    pub max_retries: u32,

    /// Base delay for the immediate path's backoff between attempts.
    pub initial_delay: Duration,

    /// Queue priority hint; higher is serviced first among due items.
    pub priority: i32,

    /// Execution mode.
    pub mode: DeliveryMode,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self {
            max_retries: crate::DEFAULT_MAX_RETRIES,
            initial_delay: Duration::from_secs(1),
            priority: 0,
            mode: DeliveryMode::Immediate,
        }
    }
}

impl DeliveryOptions {
    /// Options for background (queued) delivery.
    pub fn queued() -> Self {
        Self { mode: DeliveryMode::Queued, ..Self::default() }
    }
}

/// Rolling counters for engine observability.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Logical deliveries completed, both paths.
    pub processed: u64,
    /// Deliveries that ultimately succeeded.
    pub succeeded: u64,
    /// Deliveries that ultimately failed (immediate exhaustion or a failed
    /// queue attempt).
    pub failed: u64,
    /// Queue items promoted to the dead-letter store.
    pub dead_lettered: u64,
}

/// Queue observability snapshot.
#[derive(Debug, Clone)]
pub struct QueueStats {
    /// Items currently pending in the queue.
    pub pending: usize,
    /// Records currently in the dead-letter store.
    pub dead_letters: usize,
    /// Whether the background processor is running.
    pub processor_running: bool,
    /// Earliest scheduled time among pending items.
    pub next_scheduled: Option<DateTime<Utc>>,
}

/// Webhook delivery engine.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct DeliveryEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    store: Arc<dyn DeliveryStore>,
    executor: DeliveryExecutor,
    circuits: CircuitRegistry,
    queue: QueueManager,
    dead_letters: DeadLetterManager,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    stats: RwLock<EngineStats>,
    // Destination keys cached per webhook id; keyed by full URL, so two
    // webhooks on the same host keep independent breakers and an open
    // circuit's blast radius stays confined to one registration.
    circuit_keys: Mutex<HashMap<WebhookId, String>>,
}

impl DeliveryEngine {
    /// Creates an engine over the given store.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let executor = DeliveryExecutor::new(config.executor.clone(), store.clone(), clock.clone())?;
        let circuits = CircuitRegistry::new(config.circuit.clone(), clock.clone());
        let queue = QueueManager::new(store.clone(), config.queue.clone(), clock.clone());
        let dead_letters = DeadLetterManager::new(store.clone(), clock.clone());

        Ok(Self {
            inner: Arc::new(EngineInner {
                store,
                executor,
                circuits,
                queue,
                dead_letters,
                config,
                clock,
                stats: RwLock::new(EngineStats::default()),
                circuit_keys: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Delivers a payload to a webhook.
    ///
    /// Immediate mode returns whether delivery ultimately succeeded; queued
    /// mode returns `true` once the item is accepted. See the module
    /// documentation for the failure-visibility asymmetry between the two.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::WebhookNotFound`] for an unknown webhook
    /// and [`DeliveryError::Storage`] for storage failures. Ordinary
    /// delivery failure is `Ok(false)`, never an error.
    pub async fn deliver(
        &self,
        webhook_id: WebhookId,
        payload: WebhookPayload,
        options: DeliveryOptions,
    ) -> Result<bool> {
        let webhook = self
            .inner
            .store
            .find_webhook(webhook_id)
            .await?
            .ok_or(DeliveryError::WebhookNotFound { id: webhook_id })?;

        match options.mode {
            DeliveryMode::Immediate => self.deliver_immediate(&webhook, &payload, &options).await,
            DeliveryMode::Queued => self.deliver_queued(&webhook, payload, &options).await,
        }
    }

    /// Current engine counters.
    pub async fn stats(&self) -> EngineStats {
        self.inner.stats.read().await.clone()
    }

    /// Queue and dead-letter observability snapshot.
    pub async fn queue_stats(&self) -> Result<QueueStats> {
        Ok(QueueStats {
            pending: self.inner.queue.pending_items().await?.len(),
            dead_letters: self.inner.dead_letters.count().await?,
            processor_running: self.inner.queue.is_processor_running().await,
            next_scheduled: self.inner.queue.next_scheduled().await?,
        })
    }

    /// Circuit breaker stats for a webhook's destination, if one exists.
    pub async fn circuit_stats(&self, webhook_id: WebhookId) -> Option<CircuitStats> {
        let key = { self.inner.circuit_keys.lock().await.get(&webhook_id).cloned() }?;
        self.inner.circuits.stats(&key).await
    }

    /// Replays a dead-letter record back into the delivery queue.
    ///
    /// Returns `false` when the record or its webhook no longer exists.
    pub async fn retry_dead_letter(&self, id: DeadLetterId) -> Result<bool> {
        let queue = &self.inner.queue;
        let replayed = self
            .inner
            .dead_letters
            .retry(id, |item| async move { queue.enqueue(item).await })
            .await?;

        if replayed {
            self.ensure_processor().await;
        }
        Ok(replayed)
    }

    /// Stops the background queue processor.
    ///
    /// No queue callback fires after this returns; pending items stay in
    /// storage and resume when the next queued delivery restarts the
    /// processor.
    pub async fn stop_queue_processor(&self) {
        self.inner.queue.stop_processor().await;
    }

    /// Shuts the engine down cleanly. Safe to call more than once.
    pub async fn shutdown(&self) {
        info!("shutting down delivery engine");
        self.stop_queue_processor().await;
    }

    /// Immediate path: retry executor wrapping the destination's circuit
    /// breaker wrapping the delivery executor.
    async fn deliver_immediate(
        &self,
        webhook: &Webhook,
        payload: &WebhookPayload,
        options: &DeliveryOptions,
    ) -> Result<bool> {
        let key = self.inner.circuit_key(webhook).await;
        let breaker = self.inner.circuits.breaker(&key).await;

        let retry = RetryExecutor::new(
            RetryConfig {
                max_attempts: options.max_retries.max(1),
                base_delay: options.initial_delay,
                max_delay: self.inner.config.max_backoff_delay,
                multiplier: self.inner.config.backoff_multiplier,
                retry_on: http_retryable(),
                jitter: self.inner.config.jitter,
            },
            self.inner.clock.clone(),
        );

        let outcome = retry
            .run_collect(|attempt| {
                let breaker = breaker.clone();
                async move {
                    breaker
                        .execute(|| self.inner.executor.attempt(webhook, payload, attempt))
                        .await
                }
            })
            .await;

        let mut stats = self.inner.stats.write().await;
        stats.processed += 1;

        match outcome.result {
            Ok(_) => {
                stats.succeeded += 1;
                Ok(true)
            },
            Err(error @ DeliveryError::Storage { .. }) => Err(error),
            Err(error) => {
                stats.failed += 1;
                debug!(
                    webhook_id = %webhook.id,
                    attempts = outcome.attempts.len(),
                    error = %error,
                    "immediate delivery resolved to failure"
                );
                Ok(false)
            },
        }
    }

    /// Queued path: enqueue and make sure the processor is running.
    async fn deliver_queued(
        &self,
        webhook: &Webhook,
        payload: WebhookPayload,
        options: &DeliveryOptions,
    ) -> Result<bool> {
        let now = self.inner.clock.now_utc();
        let item = WebhookQueueItem {
            id: QueueItemId::new(),
            webhook_id: webhook.id,
            event: payload.event.clone(),
            payload,
            priority: options.priority,
            scheduled_for: now,
            created_at: now,
            retry_count: 0,
            max_retries: options.max_retries.max(1),
        };

        self.inner.queue.enqueue(item).await?;
        self.ensure_processor().await;
        Ok(true)
    }

    /// Starts the queue processor bound to this engine's per-item logic.
    /// Idempotent via the queue manager.
    async fn ensure_processor(&self) {
        let inner = self.inner.clone();
        let callback: QueueCallback = Arc::new(move |item| {
            let inner = inner.clone();
            Box::pin(async move { inner.process_item(item).await })
        });
        self.inner.queue.start_processor(callback).await;
    }
}

impl EngineInner {
    /// Destination key for a webhook's circuit breaker, cached per webhook.
    async fn circuit_key(&self, webhook: &Webhook) -> String {
        let mut keys = self.circuit_keys.lock().await;
        keys.entry(webhook.id).or_insert_with(|| webhook.url.clone()).clone()
    }

    /// Queue callback: one delivery attempt for a due item, then remove,
    /// reschedule, or dead-letter it.
    async fn process_item(&self, item: WebhookQueueItem) {
        let webhook = match self.store.find_webhook(item.webhook_id).await {
            Ok(Some(webhook)) if webhook.is_active => webhook,
            Ok(_) => {
                debug!(
                    item_id = %item.id,
                    webhook_id = %item.webhook_id,
                    "dropping queue item for missing or inactive webhook"
                );
                let _ = self.store.remove_from_queue(item.id).await;
                return;
            },
            Err(e) => {
                // Leave the item in place; the next tick retries the lookup.
                error!(item_id = %item.id, error = %e, "webhook lookup failed during queue processing");
                return;
            },
        };

        let key = self.circuit_key(&webhook).await;
        let breaker = self.circuits.breaker(&key).await;
        let attempt_number = item.retry_count + 1;

        let result = breaker
            .execute(|| self.executor.attempt(&webhook, &item.payload, attempt_number))
            .await;

        match result {
            Ok(_) => {
                let _ = self.store.remove_from_queue(item.id).await;
                let mut stats = self.stats.write().await;
                stats.processed += 1;
                stats.succeeded += 1;
            },
            Err(DeliveryError::CircuitOpen { .. }) => {
                // Not a destination attempt: reschedule one backoff step
                // without spending a retry slot.
                debug!(
                    item_id = %item.id,
                    webhook_id = %webhook.id,
                    "circuit open, deferring queue item"
                );
                self.reschedule(item, 0).await;
            },
            Err(error) => {
                // Uniform policy: every failed attempt, retryable or not,
                // consumes a retry slot. Permanent 4xx errors are not
                // fast-tracked to the dead letter queue.
                let failed = WebhookQueueItem { retry_count: item.retry_count + 1, ..item };
                {
                    let mut stats = self.stats.write().await;
                    stats.processed += 1;
                    stats.failed += 1;
                }

                if failed.is_exhausted() {
                    // Promotion order: out of the live queue first, then
                    // into the dead-letter store.
                    let _ = self.store.remove_from_queue(failed.id).await;
                    match self.dead_letters.add(&failed, &webhook, &error).await {
                        Ok(_) => {
                            self.stats.write().await.dead_lettered += 1;
                        },
                        Err(e) => {
                            error!(
                                item_id = %failed.id,
                                error = %e,
                                "failed to persist dead letter record"
                            );
                        },
                    }
                } else {
                    let increment = failed.retry_count;
                    self.reschedule(failed, increment).await;
                }
            },
        }
    }

    /// Removes and reinserts an item with `scheduled_for` pushed out by the
    /// backoff delay for the given exponent.
    async fn reschedule(&self, item: WebhookQueueItem, exponent: u32) {
        let delay = backoff::delay_for_attempt(
            exponent,
            self.config.queue_base_delay,
            self.config.max_backoff_delay,
            self.config.backoff_multiplier,
            self.config.jitter,
        );
        let scheduled_for = self.clock.now_utc()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(0));

        debug!(
            item_id = %item.id,
            retry_count = item.retry_count,
            scheduled_for = %scheduled_for,
            "rescheduling queue item"
        );

        let rescheduled = WebhookQueueItem { scheduled_for, ..item };
        let _ = self.store.remove_from_queue(rescheduled.id).await;
        if let Err(e) = self.store.add_to_queue(rescheduled).await {
            error!(error = %e, "failed to reschedule queue item");
        }
    }
}
