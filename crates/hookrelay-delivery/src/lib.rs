//! Reliable webhook delivery engine.
//!
//! Notifies external subscribers of domain events over HTTP with
//! at-least-once semantics, per-destination failure isolation, and a
//! durable record of undeliverable events.
//!
//! # Architecture
//!
//! ```text
//! producer ──▶ DeliveryEngine::deliver(webhook, payload, options)
//!                 │
//!     immediate ──┤── queued
//!                 │        │
//!   RetryExecutor │   QueueManager ── periodic scan ──▶ due items
//!        │        │        │
//!   CircuitBreaker (per destination URL)
//!        │                 │
//!   DeliveryExecutor: sign ▶ send ▶ record ▶ count
//!                          │
//!              on exhaustion: DeadLetterManager
//! ```
//!
//! # Guarantees and caveats
//!
//! - **At-least-once**: a delivery may be repeated; subscribers deduplicate.
//! - **No cross-event ordering** to the same webhook: a retried event can
//!   be overtaken by a later one.
//! - **Failure isolation**: one dead destination opens only its own
//!   circuit breaker; other destinations deliver unaffected.
//! - **No silent loss**: every attempt leaves an audit record, and a
//!   queued delivery that exhausts its retries lands in the dead-letter
//!   store for inspection and replay.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backoff;
pub mod circuit;
pub mod dead_letter;
pub mod engine;
pub mod error;
pub mod executor;
pub mod queue;
pub mod retry;
pub mod signature;

pub use engine::{DeliveryEngine, DeliveryMode, DeliveryOptions, EngineConfig, QueueStats};
pub use error::{DeliveryError, ErrorCategory, Result};

/// Default retry ceiling for deliveries.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default hard timeout per delivery attempt, in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;
