//! Storage trait definitions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entities::{Alert, AlertAmendment, AlertId, NewAlert, SessionId};
use crate::errors::AlertResult;

/// Append-only, time-ordered ledger of incident reports.
///
/// Every sequence an implementation returns is ordered by descending
/// `created_at`, ties broken by descending id.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Get storage type identifier
    fn storage_type(&self) -> &'static str;

    /// Validate and persist a new alert, assigning `id` and `created_at`
    /// when the draft leaves them empty.
    async fn append(&self, alert: NewAlert) -> AlertResult<Alert>;

    /// Load a single alert by id
    async fn get(&self, alert_id: &AlertId) -> AlertResult<Option<Alert>>;

    /// Most recent `n` alerts
    async fn recent(&self, n: usize) -> AlertResult<Vec<Alert>>;

    /// Alerts with `since <= created_at <= until`
    async fn window(&self, since: DateTime<Utc>, until: DateTime<Utc>)
        -> AlertResult<Vec<Alert>>;

    /// Change classification/details; only the original reporter may do so.
    async fn amend(
        &self,
        alert_id: &AlertId,
        requester: &SessionId,
        amendment: &AlertAmendment,
    ) -> AlertResult<Alert>;

    /// Total number of alerts
    async fn count(&self) -> AlertResult<usize>;

    /// Number of alerts created at or after `since`
    async fn count_since(&self, since: DateTime<Utc>) -> AlertResult<usize>;
}
