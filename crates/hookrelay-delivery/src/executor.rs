//! Single-attempt HTTP delivery with audit recording.
//!
//! The executor performs one delivery attempt end to end: sign the payload,
//! POST it to the destination, persist the attempt record, and update the
//! webhook's rolling counters. The sequence is fixed — sign, send, record,
//! count — and runs to completion on failure paths too, so every attempt
//! leaves exactly one audit record before any retry decision is made.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use hookrelay_core::{
    Clock, DeliveryId, DeliveryStatus, DeliveryStore, Webhook, WebhookDelivery, WebhookPayload,
};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    error::{DeliveryError, Result},
    signature,
};

/// Response body bytes kept on the audit record.
const MAX_AUDIT_BODY_BYTES: usize = 1024;

/// Fallback when a Retry-After header cannot be parsed.
const DEFAULT_RETRY_AFTER_SECONDS: u64 = 60;

/// Configuration for the delivery HTTP client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Hard timeout per delivery attempt.
    pub timeout: Duration,
    /// User agent string for outbound requests.
    pub user_agent: String,
    /// Maximum redirects to follow.
    pub max_redirects: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(crate::DEFAULT_TIMEOUT_SECONDS),
            user_agent: "hookrelay-delivery/0.1".to_string(),
            max_redirects: 3,
        }
    }
}

/// Performs individual webhook delivery attempts.
///
/// Uses a pooled HTTP client with bounded timeouts so a hung destination
/// cannot stall callers indefinitely.
pub struct DeliveryExecutor {
    client: reqwest::Client,
    config: ExecutorConfig,
    store: Arc<dyn DeliveryStore>,
    clock: Arc<dyn Clock>,
}

impl DeliveryExecutor {
    /// Creates an executor with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(
        config: ExecutorConfig,
        store: Arc<dyn DeliveryStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .build()
            .map_err(|e| DeliveryError::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config, store, clock })
    }

    /// Performs one delivery attempt against the webhook's URL.
    ///
    /// Always persists exactly one [`WebhookDelivery`] and updates the
    /// webhook's counters, whatever the outcome. Returns the record on a
    /// 2xx response; otherwise returns the classified failure after the
    /// record and counters are written.
    ///
    /// # Errors
    ///
    /// Destination failures are classified per the error taxonomy; storage
    /// failures surface as [`DeliveryError::Storage`].
    pub async fn attempt(
        &self,
        webhook: &Webhook,
        payload: &WebhookPayload,
        attempt_number: u32,
    ) -> Result<WebhookDelivery> {
        let hex_signature = signature::sign_payload(payload, &webhook.secret)?;
        let mut signed = payload.clone();
        signed.signature = Some(hex_signature.clone());

        let body = serde_json::to_vec(&signed)
            .map_err(|e| DeliveryError::configuration(format!("unserializable payload: {e}")))?;

        debug!(
            webhook_id = %webhook.id,
            url = %webhook.url,
            event = %payload.event,
            attempt_number,
            "attempting webhook delivery"
        );

        let outcome = self.send(webhook, &signed, &hex_signature, body).await;

        let (status, response_code, response_message) = match &outcome {
            Ok((code, body)) => (DeliveryStatus::Success, Some(*code), Some(body.clone())),
            Err((_, code, message)) => (DeliveryStatus::Failed, *code, Some(message.clone())),
        };

        let record = WebhookDelivery {
            id: DeliveryId::new(),
            webhook_id: webhook.id,
            event: payload.event.clone(),
            payload: signed,
            status,
            response_code,
            response_message,
            attempt_number,
            created_at: self.clock.now_utc(),
        };

        self.store.create_delivery(record.clone()).await?;
        self.store.record_webhook_outcome(webhook.id, status, record.created_at).await?;

        match outcome {
            Ok((code, _)) => {
                info!(
                    webhook_id = %webhook.id,
                    status_code = code,
                    attempt_number,
                    "webhook delivered successfully"
                );
                Ok(record)
            },
            Err((error, code, _)) => {
                warn!(
                    webhook_id = %webhook.id,
                    status_code = ?code,
                    attempt_number,
                    error = %error,
                    "webhook delivery attempt failed"
                );
                Err(error)
            },
        }
    }

    /// Issues the HTTP POST and classifies the outcome.
    ///
    /// Success carries `(status, audit body)`; failure carries the
    /// classified error, the status code when a response existed, and the
    /// message captured for the audit record.
    async fn send(
        &self,
        webhook: &Webhook,
        payload: &WebhookPayload,
        hex_signature: &str,
        body: Vec<u8>,
    ) -> std::result::Result<(u16, String), (DeliveryError, Option<u16>, String)> {
        let response = self
            .client
            .post(&webhook.url)
            .header("content-type", "application/json")
            .header("X-Webhook-Event", &payload.event)
            .header("X-Webhook-Signature", signature::signature_header(hex_signature))
            .header("X-Webhook-Timestamp", payload.timestamp.to_rfc3339())
            .body(body)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                let error = if e.is_timeout() {
                    DeliveryError::timeout(self.config.timeout.as_secs())
                } else if e.is_connect() {
                    DeliveryError::network(format!("connection failed: {e}"))
                } else if e.is_builder() {
                    DeliveryError::configuration(format!("invalid webhook URL: {e}"))
                } else {
                    DeliveryError::network(e.to_string())
                };
                let message = error.to_string();
                return Err((error, None, message));
            },
        };

        let status_code = response.status().as_u16();
        let headers = response.headers().clone();
        let body = read_audit_body(response).await;

        match status_code {
            200..=299 => Ok((status_code, body)),
            429 => {
                let retry_after = retry_after_seconds(&headers, self.clock.now_utc())
                    .unwrap_or(DEFAULT_RETRY_AFTER_SECONDS);
                Err((DeliveryError::rate_limited(retry_after), Some(status_code), body))
            },
            500..=599 => {
                Err((DeliveryError::server_error(status_code, body.clone()), Some(status_code), body))
            },
            // Remaining non-2xx statuses (including stray 1xx/3xx) are
            // permanent from the delivery core's point of view.
            _ => Err((DeliveryError::client_error(status_code, body.clone()), Some(status_code), body)),
        }
    }
}

/// Reads the response body, truncated to the audit storage bound.
async fn read_audit_body(response: reqwest::Response) -> String {
    match response.bytes().await {
        Ok(bytes) => {
            if bytes.len() > MAX_AUDIT_BODY_BYTES {
                let suffix = "... (truncated)";
                let kept = String::from_utf8_lossy(&bytes[..MAX_AUDIT_BODY_BYTES - suffix.len()]);
                format!("{kept}{suffix}")
            } else {
                String::from_utf8_lossy(&bytes).into_owned()
            }
        },
        Err(e) => format!("[failed to read response body: {e}]"),
    }
}

/// Extracts a Retry-After delay in seconds from response headers.
///
/// Supports both the seconds form and the HTTP-date form; an unparseable
/// header yields `None` so callers apply their default.
fn retry_after_seconds(headers: &HeaderMap, now: DateTime<Utc>) -> Option<u64> {
    let value = headers.get("retry-after")?.to_str().ok()?;

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds);
    }

    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        let retry_at = date.with_timezone(&Utc);
        if retry_at > now {
            return u64::try_from((retry_at - now).num_seconds()).ok();
        }
        return Some(0);
    }

    None
}

#[cfg(test)]
mod tests {
    use hookrelay_core::{MemoryStore, RealClock};
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn test_webhook(url: String) -> Webhook {
        Webhook::new(url, vec!["resource.created".into()], "wh_secret", Utc::now())
    }

    fn test_payload() -> WebhookPayload {
        WebhookPayload::new("resource.created", serde_json::json!({"id": 7}), Utc::now())
    }

    async fn executor_with_store() -> (DeliveryExecutor, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let executor = DeliveryExecutor::new(
            ExecutorConfig::default(),
            store.clone(),
            Arc::new(RealClock::new()),
        )
        .unwrap();
        (executor, store)
    }

    async fn register(store: &MemoryStore, webhook: &Webhook) {
        store.create_webhook(webhook.clone()).await.unwrap();
    }

    #[tokio::test]
    async fn successful_attempt_records_success_and_counters() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/hook"))
            .and(matchers::header("content-type", "application/json"))
            .and(matchers::header("X-Webhook-Event", "resource.created"))
            .and(matchers::header_exists("X-Webhook-Signature"))
            .and(matchers::header_exists("X-Webhook-Timestamp"))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .expect(1)
            .mount(&server)
            .await;

        let (executor, store) = executor_with_store().await;
        let webhook = test_webhook(format!("{}/hook", server.uri()));
        register(&store, &webhook).await;

        let record = executor.attempt(&webhook, &test_payload(), 1).await.unwrap();
        assert_eq!(record.status, DeliveryStatus::Success);
        assert_eq!(record.response_code, Some(200));
        assert_eq!(record.attempt_number, 1);
        assert!(record.payload.signature.is_some());

        let stored = store.find_webhook(webhook.id).await.unwrap().unwrap();
        assert_eq!(stored.delivery_count, 1);
        assert_eq!(stored.failure_count, 0);
        assert_eq!(stored.last_delivery_status, Some(DeliveryStatus::Success));
        assert_eq!(store.deliveries_for_webhook(webhook.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn server_error_records_failure_and_counters() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let (executor, store) = executor_with_store().await;
        let webhook = test_webhook(format!("{}/hook", server.uri()));
        register(&store, &webhook).await;

        let result = executor.attempt(&webhook, &test_payload(), 2).await;
        assert!(matches!(result, Err(DeliveryError::ServerError { status_code: 503, .. })));

        let stored = store.find_webhook(webhook.id).await.unwrap().unwrap();
        assert_eq!(stored.delivery_count, 1);
        assert_eq!(stored.failure_count, 1);
        assert_eq!(stored.last_delivery_status, Some(DeliveryStatus::Failed));

        let history = store.deliveries_for_webhook(webhook.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, DeliveryStatus::Failed);
        assert_eq!(history[0].response_code, Some(503));
        assert_eq!(history[0].attempt_number, 2);
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after_hint() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .set_body_string("slow down")
                    .append_header("Retry-After", "120"),
            )
            .mount(&server)
            .await;

        let (executor, store) = executor_with_store().await;
        let webhook = test_webhook(format!("{}/hook", server.uri()));
        register(&store, &webhook).await;

        let result = executor.attempt(&webhook, &test_payload(), 1).await;
        assert!(
            matches!(result, Err(DeliveryError::RateLimited { retry_after_seconds: 120 })),
            "got {result:?}"
        );
    }

    #[tokio::test]
    async fn connection_failure_records_attempt_without_status() {
        let (executor, store) = executor_with_store().await;
        // Unroutable port on localhost: connection refused.
        let webhook = test_webhook("http://127.0.0.1:1/hook".to_string());
        register(&store, &webhook).await;

        let result = executor.attempt(&webhook, &test_payload(), 1).await;
        assert!(matches!(result, Err(DeliveryError::Network { .. })));

        let history = store.deliveries_for_webhook(webhook.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].response_code, None);
        assert_eq!(history[0].status, DeliveryStatus::Failed);

        let stored = store.find_webhook(webhook.id).await.unwrap().unwrap();
        assert_eq!(stored.failure_count, 1);
    }

    #[tokio::test]
    async fn wire_body_signature_verifies_against_header() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let (executor, store) = executor_with_store().await;
        let webhook = test_webhook(format!("{}/hook", server.uri()));
        register(&store, &webhook).await;

        executor.attempt(&webhook, &test_payload(), 1).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];

        // Reconstruct the unsigned envelope the way a subscriber would.
        let mut envelope: WebhookPayload = serde_json::from_slice(&request.body).unwrap();
        assert!(envelope.signature.is_some());
        envelope.signature = None;
        let unsigned = serde_json::to_vec(&envelope).unwrap();

        let header = request.headers.get("X-Webhook-Signature").unwrap().to_str().unwrap();
        assert!(signature::verify_signature(&unsigned, header, "wh_secret"));
    }

    #[test]
    fn retry_after_parses_seconds_and_rejects_garbage() {
        let mut headers = HeaderMap::new();
        let now = Utc::now();
        assert_eq!(retry_after_seconds(&headers, now), None);

        headers.insert("retry-after", "90".parse().unwrap());
        assert_eq!(retry_after_seconds(&headers, now), Some(90));

        headers.insert("retry-after", "not-a-delay".parse().unwrap());
        assert_eq!(retry_after_seconds(&headers, now), None);
    }

    #[test]
    fn retry_after_parses_http_date() {
        let now = Utc::now();
        let future = (now + chrono::Duration::seconds(300)).to_rfc2822();

        let mut headers = HeaderMap::new();
        headers.insert("retry-after", future.parse().unwrap());

        let seconds = retry_after_seconds(&headers, now).unwrap();
        assert!((298..=300).contains(&seconds), "got {seconds}");
    }
}
