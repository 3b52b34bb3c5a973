//! Ordered in-memory ledger shared by the store implementations.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::entities::{Alert, AlertAmendment, AlertId, NewAlert, SessionId};
use crate::errors::{AlertError, AlertResult};

type Key = (DateTime<Utc>, AlertId);

const MIN_ID: AlertId = AlertId::from_uuid(Uuid::nil());
const MAX_ID: AlertId = AlertId::from_uuid(Uuid::from_u128(u128::MAX));

/// Alerts keyed by `(created_at, id)`; iterating in reverse yields feed order.
#[derive(Debug, Default)]
pub(crate) struct Ledger {
    alerts: BTreeMap<Key, Alert>,
    by_id: HashMap<AlertId, DateTime<Utc>>,
}

impl Ledger {
    pub(crate) fn from_alerts(alerts: impl IntoIterator<Item = Alert>) -> AlertResult<Self> {
        let mut ledger = Self::default();
        for alert in alerts {
            if ledger.by_id.contains_key(&alert.id) {
                return Err(AlertError::StorageUnavailable {
                    reason: format!("duplicate alert '{}' in ledger", alert.id),
                });
            }
            ledger.insert(alert);
        }
        Ok(ledger)
    }

    /// Turn a draft into a storable alert. Nothing is written.
    pub(crate) fn materialize(&self, draft: NewAlert, now: DateTime<Utc>) -> AlertResult<Alert> {
        draft.location.validate()?;

        if let Some(media) = draft.media_refs.iter().find(|m| m.uri.trim().is_empty()) {
            return Err(AlertError::InvalidArgument {
                field: "media_refs",
                reason: format!("{:?} reference has an empty uri", media.kind),
            });
        }

        let id = draft.id.unwrap_or_else(AlertId::generate);
        if self.by_id.contains_key(&id) {
            return Err(AlertError::InvalidArgument {
                field: "id",
                reason: format!("alert '{id}' already exists"),
            });
        }

        Ok(Alert {
            id,
            reporter_session_id: draft.reporter_session_id,
            location: draft.location,
            created_at: draft.created_at.unwrap_or(now),
            classification: draft.classification,
            details: draft.details,
            media_refs: draft.media_refs,
        })
    }

    pub(crate) fn insert(&mut self, alert: Alert) {
        self.by_id.insert(alert.id, alert.created_at);
        self.alerts.insert((alert.created_at, alert.id), alert);
    }

    pub(crate) fn remove(&mut self, alert_id: &AlertId) -> Option<Alert> {
        let created_at = self.by_id.remove(alert_id)?;
        self.alerts.remove(&(created_at, *alert_id))
    }

    pub(crate) fn get(&self, alert_id: &AlertId) -> Option<&Alert> {
        let created_at = self.by_id.get(alert_id)?;
        self.alerts.get(&(*created_at, *alert_id))
    }

    pub(crate) fn recent(&self, n: usize) -> Vec<Alert> {
        self.alerts.values().rev().take(n).cloned().collect()
    }

    pub(crate) fn window(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Vec<Alert> {
        if since > until {
            return Vec::new();
        }
        self.alerts
            .range((since, MIN_ID)..=(until, MAX_ID))
            .rev()
            .map(|(_, alert)| alert.clone())
            .collect()
    }

    /// Amended copy of an alert, after the ownership check. The ledger is
    /// left untouched so callers can persist before committing.
    pub(crate) fn amended(
        &self,
        alert_id: &AlertId,
        requester: &SessionId,
        amendment: &AlertAmendment,
    ) -> AlertResult<Alert> {
        let alert = self.get(alert_id).ok_or_else(|| AlertError::NotFound {
            alert_id: alert_id.to_string(),
        })?;
        if alert.reporter_session_id != *requester {
            return Err(AlertError::Forbidden {
                alert_id: alert_id.to_string(),
                session_id: requester.to_string(),
            });
        }
        let mut updated = alert.clone();
        amendment.apply(&mut updated);
        Ok(updated)
    }

    /// Replace an alert in place; key fields never change on amendment.
    pub(crate) fn replace(&mut self, alert: Alert) {
        self.alerts.insert((alert.created_at, alert.id), alert);
    }

    pub(crate) fn len(&self) -> usize {
        self.alerts.len()
    }

    pub(crate) fn count_since(&self, since: DateTime<Utc>) -> usize {
        self.alerts.range((since, MIN_ID)..).count()
    }

    /// Alerts in ascending order, as written to disk.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.values()
    }
}
