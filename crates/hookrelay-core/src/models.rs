//! Core domain models and strongly-typed identifiers.
//!
//! Defines webhook registrations, event payloads, delivery attempt records,
//! queue items, and dead-letter records, plus newtype ID wrappers for
//! compile-time type safety across the delivery pipeline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Strongly-typed webhook registration identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WebhookId(pub Uuid);

impl WebhookId {
    /// Creates a new random webhook ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WebhookId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WebhookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for WebhookId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Strongly-typed delivery attempt identifier.
///
/// Each HTTP attempt produces exactly one [`WebhookDelivery`] carrying one
/// of these; the records are append-only audit history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryId(pub Uuid);

impl DeliveryId {
    /// Creates a new random delivery ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DeliveryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for DeliveryId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Strongly-typed pending queue item identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueItemId(pub Uuid);

impl QueueItemId {
    /// Creates a new random queue item ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for QueueItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueueItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for QueueItemId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Strongly-typed dead-letter record identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeadLetterId(pub Uuid);

impl DeadLetterId {
    /// Creates a new random dead-letter ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DeadLetterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeadLetterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for DeadLetterId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Endpoint acknowledged with a 2xx response.
    Success,
    /// Transport failure or non-2xx response.
    Failed,
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Webhook subscription record.
///
/// Owned by the registration subsystem; the delivery core reads it and
/// writes back rolling counters and last-delivery metadata after each
/// attempt. Never deleted by the delivery core itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    /// Unique identifier for this registration.
    pub id: WebhookId,

    /// Destination URL for deliveries.
    pub url: String,

    /// Event types this webhook is subscribed to.
    pub events: Vec<String>,

    /// Whether deliveries to this webhook are enabled.
    pub is_active: bool,

    /// Shared secret for payload signing.
    pub secret: String,

    /// Total delivery attempts made (success and failure).
    pub delivery_count: u64,

    /// Total failed delivery attempts.
    pub failure_count: u64,

    /// When the most recent attempt completed.
    pub last_delivery_at: Option<DateTime<Utc>>,

    /// Outcome of the most recent attempt.
    pub last_delivery_status: Option<DeliveryStatus>,

    /// When this registration was created.
    pub created_at: DateTime<Utc>,
}

impl Webhook {
    /// Creates an active webhook subscribed to the given events.
    pub fn new(
        url: impl Into<String>,
        events: Vec<String>,
        secret: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: WebhookId::new(),
            url: url.into(),
            events,
            is_active: true,
            secret: secret.into(),
            delivery_count: 0,
            failure_count: 0,
            last_delivery_at: None,
            last_delivery_status: None,
            created_at,
        }
    }

    /// Whether this webhook is active and subscribed to the event type.
    pub fn subscribes_to(&self, event: &str) -> bool {
        self.is_active && self.events.iter().any(|e| e == event)
    }
}

/// Event envelope handed to the delivery core by producers.
///
/// Immutable once constructed except for the signature, which the delivery
/// executor fills in just before transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Event type string, e.g. `resource.created`.
    pub event: String,

    /// Arbitrary JSON event data.
    pub data: serde_json::Value,

    /// When the event occurred.
    pub timestamp: DateTime<Utc>,

    /// Hex HMAC-SHA256 of the envelope, set at send time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl WebhookPayload {
    /// Creates an unsigned payload for the given event.
    pub fn new(event: impl Into<String>, data: serde_json::Value, timestamp: DateTime<Utc>) -> Self {
        Self { event: event.into(), data, timestamp, signature: None }
    }
}

/// Append-only record of one HTTP delivery attempt.
///
/// This is the audit trail: one record per attempt regardless of outcome,
/// never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    /// Unique identifier for this attempt.
    pub id: DeliveryId,

    /// Webhook this attempt targeted.
    pub webhook_id: WebhookId,

    /// Event type delivered.
    pub event: String,

    /// The payload as sent, signature included.
    pub payload: WebhookPayload,

    /// Attempt outcome.
    pub status: DeliveryStatus,

    /// HTTP response code, absent when no response was received.
    pub response_code: Option<u16>,

    /// Response body or transport error message.
    pub response_message: Option<String>,

    /// 1-based attempt number within the logical delivery.
    pub attempt_number: u32,

    /// When this attempt was recorded.
    pub created_at: DateTime<Utc>,
}

/// Pending or scheduled delivery awaiting the queue processor.
///
/// Mutated only by remove-and-reinsert: each failed attempt produces a
/// replacement with `retry_count` incremented and `scheduled_for` advanced.
/// Invariant: `retry_count <= max_retries`; an item that fails at the
/// ceiling leaves the queue for the dead-letter store and only re-enters
/// through an explicit dead-letter replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookQueueItem {
    /// Unique identifier for this queue entry.
    pub id: QueueItemId,

    /// Target webhook.
    pub webhook_id: WebhookId,

    /// Event type to deliver.
    pub event: String,

    /// Payload to deliver.
    pub payload: WebhookPayload,

    /// Higher priority is serviced first among due items; a tie-break hint,
    /// not a hard scheduling guarantee.
    pub priority: i32,

    /// Item is not eligible for dispatch before this time.
    pub scheduled_for: DateTime<Utc>,

    /// When this item was first enqueued.
    pub created_at: DateTime<Utc>,

    /// Failed attempts so far.
    pub retry_count: u32,

    /// Attempt ceiling before dead-lettering.
    pub max_retries: u32,
}

impl WebhookQueueItem {
    /// Whether this item is eligible for dispatch at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_for <= now
    }

    /// Whether the retry budget is spent.
    pub fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

/// Terminal failure record for a delivery that exhausted its retries.
///
/// Created exactly once per exhausted queue item; destroyed only by
/// operator action (delete or replay back into the queue).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterWebhook {
    /// Unique identifier for this record.
    pub id: DeadLetterId,

    /// Webhook the delivery targeted.
    pub webhook_id: WebhookId,

    /// Event type that could not be delivered.
    pub event: String,

    /// The undeliverable payload.
    pub payload: WebhookPayload,

    /// Human-readable description of the final failure.
    pub failure_reason: String,

    /// When the last attempt failed.
    pub last_attempt_at: DateTime<Utc>,

    /// When the original queue item was created.
    pub original_created_at: DateTime<Utc>,

    /// Trailing failed delivery records that led to exhaustion.
    pub attempts: Vec<WebhookDelivery>,
}

/// Partial update for registration-side webhook fields.
///
/// Rolling delivery counters are excluded on purpose; those change only
/// through the atomic outcome-recording storage operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookPatch {
    /// Replacement destination URL.
    pub url: Option<String>,
    /// Replacement event subscription set.
    pub events: Option<Vec<String>>,
    /// Enable or disable deliveries.
    pub is_active: Option<bool>,
    /// Replacement signing secret.
    pub secret: Option<String>,
}

/// Partial update for a delivery record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryPatch {
    /// Replacement outcome status.
    pub status: Option<DeliveryStatus>,
    /// Replacement response code.
    pub response_code: Option<u16>,
    /// Replacement response message.
    pub response_message: Option<String>,
}
