//! Log-only transport for local development.

use async_trait::async_trait;
use tracing::info;

use crate::error::PushError;
use crate::summary::AlertSummary;
use crate::PushTransport;

/// Writes every push to the tracing log and reports success.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransport;

#[async_trait]
impl PushTransport for LogTransport {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, recipient: &str, summary: &AlertSummary) -> Result<(), PushError> {
        info!(
            transport = "log",
            recipient,
            alert_id = %summary.alert_id,
            urgency = summary.urgency.as_str(),
            title = %summary.title(),
            "Push delivered"
        );
        Ok(())
    }
}
