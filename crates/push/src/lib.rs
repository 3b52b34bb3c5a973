//! Push transport boundary for VeciSafe proximity alerts.
//!
//! The alert core decides *who* gets notified and tracks each delivery; this
//! crate only knows how to hand one notification for one recipient to an
//! outbound push system.
//!
//! # Usage
//!
//! ```no_run
//! use push::{AlertSummary, PushTransport, Urgency};
//!
//! # async fn run() -> Result<(), push::PushError> {
//! let transport = push::from_env();
//! let summary = AlertSummary {
//!     alert_id: "0190c6a2-0000-7000-8000-000000000001".to_string(),
//!     classification: "robbery".to_string(),
//!     details: "Phone snatched at the bus stop".to_string(),
//!     latitude: 40.7128,
//!     longitude: -74.0060,
//!     created_at: chrono::Utc::now(),
//!     urgency: Urgency::High,
//!     distance_m: Some(14.0),
//! };
//! transport.send("session-id", &summary).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! - `VECISAFE_PUSH_WEBHOOK_URL`: push gateway URL (enables the webhook
//!   transport; without it pushes are only logged)

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod summary;
pub mod transports;

use std::sync::Arc;

use tracing::{info, warn};

pub use error::PushError;
pub use summary::{AlertSummary, Urgency};
pub use transports::log::LogTransport;
pub use transports::webhook::WebhookTransport;
pub use transports::PushTransport;

/// Pick a transport from environment variables.
///
/// Uses the webhook gateway when configured and falls back to the log
/// transport otherwise.
#[must_use]
pub fn from_env() -> Arc<dyn PushTransport> {
    let webhook = WebhookTransport::from_env();
    if webhook.enabled() {
        info!("Push transport: webhook");
        Arc::new(webhook)
    } else {
        warn!("No push gateway configured, pushes will only be logged");
        Arc::new(LogTransport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_transport_always_succeeds() {
        let summary = AlertSummary {
            alert_id: "a1".to_string(),
            classification: "general".to_string(),
            details: "Emergency report".to_string(),
            latitude: 0.0,
            longitude: 0.0,
            created_at: chrono::Utc::now(),
            urgency: Urgency::Normal,
            distance_m: None,
        };
        assert_eq!(LogTransport.name(), "log");
        LogTransport.send("s1", &summary).await.unwrap();
    }
}
