//! In-memory alert store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::ledger::Ledger;
use super::traits::AlertStore;
use crate::clock::{Clock, SystemClock};
use crate::entities::{Alert, AlertAmendment, AlertId, NewAlert, SessionId};
use crate::errors::AlertResult;

/// Volatile store for tests and single-process deployments.
pub struct MemoryAlertStore {
    ledger: RwLock<Ledger>,
    clock: Arc<dyn Clock>,
}

impl MemoryAlertStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            ledger: RwLock::new(Ledger::default()),
            clock,
        }
    }
}

impl Default for MemoryAlertStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    fn storage_type(&self) -> &'static str {
        "memory"
    }

    async fn append(&self, alert: NewAlert) -> AlertResult<Alert> {
        let mut ledger = self.ledger.write().await;
        let alert = ledger.materialize(alert, self.clock.now())?;
        ledger.insert(alert.clone());
        debug!(alert_id = %alert.id, created_at = %alert.created_at, "Alert appended");
        Ok(alert)
    }

    async fn get(&self, alert_id: &AlertId) -> AlertResult<Option<Alert>> {
        Ok(self.ledger.read().await.get(alert_id).cloned())
    }

    async fn recent(&self, n: usize) -> AlertResult<Vec<Alert>> {
        Ok(self.ledger.read().await.recent(n))
    }

    async fn window(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> AlertResult<Vec<Alert>> {
        Ok(self.ledger.read().await.window(since, until))
    }

    async fn amend(
        &self,
        alert_id: &AlertId,
        requester: &SessionId,
        amendment: &AlertAmendment,
    ) -> AlertResult<Alert> {
        let mut ledger = self.ledger.write().await;
        let updated = ledger.amended(alert_id, requester, amendment)?;
        ledger.replace(updated.clone());
        Ok(updated)
    }

    async fn count(&self) -> AlertResult<usize> {
        Ok(self.ledger.read().await.len())
    }

    async fn count_since(&self, since: DateTime<Utc>) -> AlertResult<usize> {
        Ok(self.ledger.read().await.count_since(since))
    }
}
