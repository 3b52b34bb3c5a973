//! Delivery intent bookkeeping.
//!
//! The [`DeliveryStore`] is the record of every intent. The ledger itself
//! only remembers which pairs a delivery task currently owns; a pair leaves
//! memory as soon as its task settles or is cancelled.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::book::sort;
use super::store::DeliveryStore;
use crate::entities::{AlertId, DeliveryIntent, SessionId};
use crate::errors::AlertResult;

/// Intents a dispatch created and the ones it has to drive.
#[derive(Debug, Default)]
pub(crate) struct Claim {
    pub created: Vec<DeliveryIntent>,
    pub to_drive: Vec<DeliveryIntent>,
}

/// Delivery ledger shared by every dispatch.
pub struct DeliveryLedger {
    store: Arc<dyn DeliveryStore>,
    in_flight: Mutex<HashSet<(AlertId, SessionId)>>,
}

impl DeliveryLedger {
    #[must_use]
    pub fn new(store: Arc<dyn DeliveryStore>) -> Self {
        Self {
            store,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    #[must_use]
    pub fn store(&self) -> &dyn DeliveryStore {
        self.store.as_ref()
    }

    /// Create intents for recipients without a current one and take
    /// ownership of every idle Pending/Failed intent of the alert.
    ///
    /// New intents are in the store before this returns. Claims are
    /// serialized; a pair owned by a running task is never handed out twice.
    pub(crate) async fn claim(
        &self,
        alert_id: AlertId,
        recipients: &[(SessionId, f64)],
        now: DateTime<Utc>,
    ) -> AlertResult<Claim> {
        let mut in_flight = self.in_flight.lock().await;
        let current = self.store.current(&alert_id).await?;
        let mut known: HashSet<SessionId> =
            current.iter().map(|i| i.recipient_session_id).collect();

        let mut claim = Claim::default();
        for &(recipient, distance_m) in recipients {
            if !known.insert(recipient) {
                continue;
            }
            let mut intent = DeliveryIntent::new(alert_id, recipient, distance_m);
            intent.created_at = now;
            claim.created.push(intent);
        }
        self.store.record(&claim.created).await?;

        claim.to_drive = current
            .into_iter()
            .filter(|i| !i.status.is_terminal())
            .filter(|i| !in_flight.contains(&(alert_id, i.recipient_session_id)))
            .chain(claim.created.iter().cloned())
            .collect();
        for intent in &claim.to_drive {
            in_flight.insert((alert_id, intent.recipient_session_id));
        }

        sort(&mut claim.created);
        sort(&mut claim.to_drive);
        Ok(claim)
    }

    /// Write the latest state of an owned intent.
    pub(crate) async fn record(&self, intent: &DeliveryIntent) -> AlertResult<()> {
        self.store.record(std::slice::from_ref(intent)).await
    }

    /// Give up ownership of a pair (settled, or left for a later pass).
    pub(crate) async fn release(&self, alert_id: AlertId, recipient: SessionId) {
        self.in_flight.lock().await.remove(&(alert_id, recipient));
    }

    /// Number of pairs currently owned by delivery tasks.
    pub async fn in_flight(&self) -> usize {
        self.in_flight.lock().await.len()
    }
}
