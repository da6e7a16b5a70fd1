//! Core domain models and storage interface for webhook delivery.
//!
//! Provides strongly-typed domain primitives, the storage seam the delivery
//! pipeline runs against, and the clock abstraction that keeps timing
//! deterministic in tests. The delivery crate depends on these foundations
//! for type safety and persistence-technology independence.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{
    DeadLetterId, DeadLetterWebhook, DeliveryId, DeliveryPatch, DeliveryStatus, Webhook,
    WebhookDelivery, WebhookId, WebhookPatch, WebhookPayload, WebhookQueueItem, QueueItemId,
};
pub use storage::{DeliveryStore, MemoryStore};
pub use time::{Clock, RealClock, TestClock};
