//! Webhook push transport.
//!
//! Posts one JSON document per recipient to a push gateway, which owns the
//! device-token lookup and the OS-level push.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::PushError;
use crate::summary::AlertSummary;
use crate::PushTransport;

/// Environment variable for the push gateway URL.
const ENV_PUSH_WEBHOOK_URL: &str = "VECISAFE_PUSH_WEBHOOK_URL";

/// Fallback when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 1;

/// Push gateway webhook transport.
pub struct WebhookTransport {
    webhook_url: Option<String>,
    client: reqwest::Client,
}

impl WebhookTransport {
    /// Create a transport from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let webhook_url = std::env::var(ENV_PUSH_WEBHOOK_URL)
            .ok()
            .filter(|s| !s.is_empty());

        if webhook_url.is_some() {
            debug!("Webhook push transport enabled");
        } else {
            debug!("Webhook push transport disabled (VECISAFE_PUSH_WEBHOOK_URL not set)");
        }

        Self {
            webhook_url,
            client: reqwest::Client::new(),
        }
    }

    /// Create a transport with a specific gateway URL.
    #[must_use]
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: Some(webhook_url.into()),
            client: reqwest::Client::new(),
        }
    }

    /// Check if a gateway URL is configured.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    fn format_payload<'a>(recipient: &'a str, summary: &'a AlertSummary) -> PushPayload<'a> {
        PushPayload {
            recipient,
            title: summary.title(),
            body: summary.body(),
            urgency: summary.urgency.as_str(),
            alert: summary,
        }
    }
}

#[async_trait]
impl PushTransport for WebhookTransport {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, recipient: &str, summary: &AlertSummary) -> Result<(), PushError> {
        let webhook_url = self
            .webhook_url
            .as_ref()
            .ok_or_else(|| PushError::NotConfigured(ENV_PUSH_WEBHOOK_URL.to_string()))?;

        let payload = Self::format_payload(recipient, summary);

        debug!(transport = "webhook", recipient, alert_id = %summary.alert_id, "Sending push");

        let response = self.client.post(webhook_url).json(&payload).send().await?;
        let status = response.status();

        if status.is_success() {
            debug!(transport = "webhook", recipient, "Push accepted");
            return Ok(());
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            warn!(transport = "webhook", retry_after_secs, "Push gateway rate limited");
            return Err(PushError::RateLimited { retry_after_secs });
        }

        let body = response.text().await.unwrap_or_default();
        warn!(
            transport = "webhook",
            status = %status,
            body = %body,
            "Push gateway request failed"
        );

        Err(PushError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

// =============================================================================
// Gateway wire types
// =============================================================================

#[derive(Debug, Serialize)]
struct PushPayload<'a> {
    recipient: &'a str,
    title: String,
    body: String,
    urgency: &'static str,
    alert: &'a AlertSummary,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::Urgency;
    use chrono::Utc;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn summary() -> AlertSummary {
        AlertSummary {
            alert_id: "0190c6a2-0000-7000-8000-000000000001".to_string(),
            classification: "suspicious".to_string(),
            details: "Person checking car doors".to_string(),
            latitude: 40.7128,
            longitude: -74.006,
            created_at: Utc::now(),
            urgency: Urgency::Normal,
            distance_m: Some(120.0),
        }
    }

    #[tokio::test]
    async fn test_send_posts_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/push"))
            .and(body_partial_json(serde_json::json!({
                "recipient": "session-1",
                "title": "Suspicious reported 120 m away",
                "urgency": "normal",
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let transport = WebhookTransport::new(format!("{}/push", server.uri()));
        transport.send("session-1", &summary()).await.unwrap();
    }

    #[tokio::test]
    async fn test_rate_limit_reads_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
            .mount(&server)
            .await;

        let transport = WebhookTransport::new(server.uri());
        let err = transport.send("session-1", &summary()).await.unwrap_err();
        assert!(matches!(
            err,
            PushError::RateLimited {
                retry_after_secs: 7
            }
        ));
    }

    #[tokio::test]
    async fn test_server_error_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let transport = WebhookTransport::new(server.uri());
        let err = transport.send("session-1", &summary()).await.unwrap_err();
        match err {
            PushError::Rejected { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "unavailable");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unconfigured_transport_fails() {
        let transport = WebhookTransport {
            webhook_url: None,
            client: reqwest::Client::new(),
        };
        assert!(!transport.enabled());
        let err = transport.send("session-1", &summary()).await.unwrap_err();
        assert!(matches!(err, PushError::NotConfigured(_)));
    }
}
