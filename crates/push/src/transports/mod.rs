//! Push transport implementations.

pub mod log;
pub mod webhook;

use async_trait::async_trait;

use crate::error::PushError;
use crate::summary::AlertSummary;

/// Trait for push transports (webhook gateway, log sink, ...).
///
/// A transport turns one delivery into one outbound push. It reports only
/// success or failure; retry policy belongs to the caller.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Get the name of this transport.
    fn name(&self) -> &'static str;

    /// Send one notification to one recipient session.
    async fn send(&self, recipient: &str, summary: &AlertSummary) -> Result<(), PushError>;
}
