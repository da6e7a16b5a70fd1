//! End-to-end delivery engine tests against a mock HTTP endpoint.
//!
//! Exercises the full pipeline: immediate delivery with retries and
//! circuit breaking, queued delivery with rescheduling and dead-lettering,
//! and dead-letter replay.

use std::{future::Future, sync::Arc, time::Duration};

use anyhow::Result;
use chrono::Utc;
use hookrelay_core::{
    DeliveryStatus, DeliveryStore, MemoryStore, RealClock, Webhook, WebhookPayload,
};
use hookrelay_delivery::{
    backoff::Jitter,
    circuit::{CircuitBreakerConfig, CircuitState},
    engine::{DeliveryEngine, DeliveryMode, DeliveryOptions, EngineConfig},
    queue::QueueConfig,
};
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

fn fast_config(failure_threshold: u32) -> EngineConfig {
    EngineConfig {
        circuit: CircuitBreakerConfig {
            failure_threshold,
            success_threshold: 2,
            open_timeout: Duration::from_secs(60),
        },
        queue: QueueConfig {
            scan_interval: Duration::from_millis(20),
            max_concurrent_dispatch: 4,
        },
        queue_base_delay: Duration::from_millis(10),
        max_backoff_delay: Duration::from_secs(1),
        jitter: Jitter::disabled(),
        ..EngineConfig::default()
    }
}

fn engine_with_store(config: EngineConfig) -> (DeliveryEngine, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let engine = DeliveryEngine::new(store.clone(), config, Arc::new(RealClock::new()))
        .expect("engine creation should succeed");
    (engine, store)
}

async fn register_webhook(store: &MemoryStore, url: String) -> Webhook {
    let webhook = Webhook::new(url, vec!["resource.updated".into()], "wh_secret", Utc::now());
    store.create_webhook(webhook.clone()).await.unwrap();
    webhook
}

fn payload() -> WebhookPayload {
    WebhookPayload::new("resource.updated", serde_json::json!({"id": 42}), Utc::now())
}

fn immediate(max_retries: u32) -> DeliveryOptions {
    DeliveryOptions {
        max_retries,
        initial_delay: Duration::from_millis(10),
        priority: 0,
        mode: DeliveryMode::Immediate,
    }
}

fn queued(max_retries: u32) -> DeliveryOptions {
    DeliveryOptions { mode: DeliveryMode::Queued, ..immediate(max_retries) }
}

/// Polls a condition until it holds or a generous deadline passes.
async fn wait_until<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for: {what}");
}

#[tokio::test]
async fn failing_endpoint_recovers_on_third_attempt() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/hook"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/hook"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .mount(&server)
        .await;

    let (engine, store) = engine_with_store(fast_config(5));
    let webhook = register_webhook(&store, format!("{}/hook", server.uri())).await;

    let delivered = engine.deliver(webhook.id, payload(), immediate(3)).await?;
    assert!(delivered);

    // One audit record per HTTP attempt: two failures, then the success.
    let history = store.deliveries_for_webhook(webhook.id).await?;
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].status, DeliveryStatus::Failed);
    assert_eq!(history[1].status, DeliveryStatus::Failed);
    assert_eq!(history[2].status, DeliveryStatus::Success);
    assert_eq!(
        history.iter().map(|d| d.attempt_number).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );

    let stored = store.find_webhook(webhook.id).await?.unwrap();
    assert_eq!(stored.delivery_count, 3);
    assert_eq!(stored.failure_count, 2);
    assert_eq!(stored.last_delivery_status, Some(DeliveryStatus::Success));
    Ok(())
}

#[tokio::test]
async fn exhausted_immediate_delivery_resolves_to_false() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .mount(&server)
        .await;

    let (engine, store) = engine_with_store(fast_config(10));
    let webhook = register_webhook(&store, format!("{}/hook", server.uri())).await;

    let delivered = engine.deliver(webhook.id, payload(), immediate(2)).await?;
    assert!(!delivered);

    let history = store.deliveries_for_webhook(webhook.id).await?;
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|d| d.status == DeliveryStatus::Failed));
    Ok(())
}

#[tokio::test]
async fn permanent_error_is_not_retried_inline() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
        .expect(1)
        .mount(&server)
        .await;

    let (engine, store) = engine_with_store(fast_config(10));
    let webhook = register_webhook(&store, format!("{}/hook", server.uri())).await;

    let delivered = engine.deliver(webhook.id, payload(), immediate(5)).await?;
    assert!(!delivered);

    assert_eq!(store.deliveries_for_webhook(webhook.id).await?.len(), 1);
    server.verify().await;
    Ok(())
}

#[tokio::test]
async fn sustained_failures_open_circuit_and_short_circuit_next_call() -> Result<()> {
    let server = MockServer::start().await;
    // Exactly five requests may reach the endpoint; the sixth delivery
    // must be short-circuited by the open breaker.
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(5)
        .mount(&server)
        .await;

    let (engine, store) = engine_with_store(fast_config(5));
    let webhook = register_webhook(&store, format!("{}/hook", server.uri())).await;

    for _ in 0..5 {
        let delivered = engine.deliver(webhook.id, payload(), immediate(1)).await?;
        assert!(!delivered);
    }

    let stats = engine.circuit_stats(webhook.id).await.unwrap();
    assert_eq!(stats.state, CircuitState::Open);

    // Sixth call: no HTTP traffic, no new audit record.
    let delivered = engine.deliver(webhook.id, payload(), immediate(1)).await?;
    assert!(!delivered);
    assert_eq!(store.deliveries_for_webhook(webhook.id).await?.len(), 5);

    server.verify().await;
    Ok(())
}

#[tokio::test]
async fn queued_delivery_reaches_endpoint_in_background() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .mount(&server)
        .await;

    let (engine, store) = engine_with_store(fast_config(5));
    let webhook = register_webhook(&store, format!("{}/hook", server.uri())).await;

    let accepted = engine.deliver(webhook.id, payload(), queued(3)).await?;
    assert!(accepted);

    let engine_ref = &engine;
    wait_until("queued item delivered", move || async move {
        engine_ref.queue_stats().await.unwrap().pending == 0
    })
    .await;
    engine.shutdown().await;

    let history = store.deliveries_for_webhook(webhook.id).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, DeliveryStatus::Success);

    let stored = store.find_webhook(webhook.id).await?.unwrap();
    assert_eq!(stored.delivery_count, 1);
    assert_eq!(stored.failure_count, 0);
    Ok(())
}

#[tokio::test]
async fn exhausted_queued_delivery_lands_in_dead_letter_queue() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let (engine, store) = engine_with_store(fast_config(10));
    let webhook = register_webhook(&store, format!("{}/hook", server.uri())).await;

    engine.deliver(webhook.id, payload(), queued(3)).await?;

    let engine_ref = &engine;
    wait_until("item dead-lettered", move || async move {
        engine_ref.queue_stats().await.unwrap().dead_letters == 1
    })
    .await;
    engine.shutdown().await;

    let stats = engine.queue_stats().await?;
    assert_eq!(stats.pending, 0, "exhausted item must leave the pending queue");

    // Exactly one HTTP attempt per retry slot.
    assert_eq!(store.deliveries_for_webhook(webhook.id).await?.len(), 3);

    let records = store.dead_letters().await?;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.webhook_id, webhook.id);
    assert_eq!(record.event, "resource.updated");
    assert!(record.failure_reason.contains("after 3 attempts"));
    assert!(record.failure_reason.contains("HTTP 500"));
    assert_eq!(record.attempts.len(), 3);
    Ok(())
}

#[tokio::test]
async fn dead_letter_replay_delivers_after_endpoint_recovers() -> Result<()> {
    let server = MockServer::start().await;
    // Three failures exhaust the original item, then the endpoint recovers.
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .up_to_n_times(3)
        .mount(&server)
        .await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .mount(&server)
        .await;

    let (engine, store) = engine_with_store(fast_config(10));
    let webhook = register_webhook(&store, format!("{}/hook", server.uri())).await;

    engine.deliver(webhook.id, payload(), queued(3)).await?;
    let engine_ref = &engine;
    wait_until("item dead-lettered", move || async move {
        engine_ref.queue_stats().await.unwrap().dead_letters == 1
    })
    .await;

    let record_id = store.dead_letters().await?[0].id;
    assert!(engine.retry_dead_letter(record_id).await?);

    let engine_ref = &engine;
    wait_until("replayed item delivered", move || async move {
        let stats = engine_ref.queue_stats().await.unwrap();
        stats.pending == 0 && stats.dead_letters == 0
    })
    .await;
    engine.shutdown().await;

    let history = store.deliveries_for_webhook(webhook.id).await?;
    assert_eq!(history.len(), 4);
    assert_eq!(history.last().unwrap().status, DeliveryStatus::Success);
    // Replay resets the attempt numbering along with the retry budget.
    assert_eq!(history.last().unwrap().attempt_number, 1);
    Ok(())
}

#[tokio::test]
async fn replaying_unknown_dead_letter_returns_false() -> Result<()> {
    let (engine, _store) = engine_with_store(fast_config(5));
    assert!(!engine.retry_dead_letter(hookrelay_core::DeadLetterId::new()).await?);
    Ok(())
}

#[tokio::test]
async fn queue_stats_reflect_rescheduled_retry() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let config = EngineConfig {
        // Long reschedule delay keeps the retried item observable.
        queue_base_delay: Duration::from_secs(60),
        max_backoff_delay: Duration::from_secs(300),
        ..fast_config(10)
    };
    let (engine, store) = engine_with_store(config);
    let webhook = register_webhook(&store, format!("{}/hook", server.uri())).await;

    engine.deliver(webhook.id, payload(), queued(3)).await?;

    let store_ref = &store;
    let webhook_id = webhook.id;
    wait_until("first attempt recorded", move || async move {
        store_ref.deliveries_for_webhook(webhook_id).await.unwrap().len() == 1
    })
    .await;
    engine.shutdown().await;

    let items = store.queue_items().await?;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].retry_count, 1);
    assert!(items[0].scheduled_for > Utc::now(), "retry must be scheduled into the future");

    let stats = engine.queue_stats().await?;
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.next_scheduled, Some(items[0].scheduled_for));
    Ok(())
}
