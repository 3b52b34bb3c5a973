//! Delivery records shared by the memory and file delivery stores.
//!
//! At most one current intent exists per `(alert, recipient)` pair.
//! Exhausted intents move to the archive, which frees the pair for a new
//! delivery cycle.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::entities::{AlertId, DeliveryIntent, DeliveryStatus, SessionId};
use crate::errors::{AlertError, AlertResult};

/// On-disk shape of the book
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct BookFile {
    #[serde(default)]
    pub current: Vec<DeliveryIntent>,
    #[serde(default)]
    pub archive: Vec<DeliveryIntent>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct DeliveryBook {
    current: BTreeMap<AlertId, BTreeMap<SessionId, DeliveryIntent>>,
    archive: Vec<DeliveryIntent>,
}

impl DeliveryBook {
    pub fn from_file(file: BookFile) -> AlertResult<Self> {
        let mut book = Self {
            archive: file.archive,
            ..Self::default()
        };
        for intent in file.current {
            if intent.status == DeliveryStatus::Exhausted {
                book.archive.push(intent);
                continue;
            }
            let previous = book
                .current
                .entry(intent.alert_id)
                .or_default()
                .insert(intent.recipient_session_id, intent);
            if let Some(previous) = previous {
                return Err(AlertError::StorageUnavailable {
                    reason: format!(
                        "delivery book has two intents for alert '{}' and recipient '{}'",
                        previous.alert_id, previous.recipient_session_id
                    ),
                });
            }
        }
        Ok(book)
    }

    pub fn to_file(&self) -> BookFile {
        BookFile {
            current: self
                .current
                .values()
                .flat_map(|entries| entries.values().cloned())
                .collect(),
            archive: self.archive.clone(),
        }
    }

    /// Store the latest state of an intent.
    pub fn record(&mut self, intent: &DeliveryIntent) {
        if intent.status == DeliveryStatus::Exhausted {
            if let Some(entries) = self.current.get_mut(&intent.alert_id) {
                entries.remove(&intent.recipient_session_id);
                if entries.is_empty() {
                    self.current.remove(&intent.alert_id);
                }
            }
            self.archive.push(intent.clone());
            return;
        }
        self.current
            .entry(intent.alert_id)
            .or_default()
            .insert(intent.recipient_session_id, intent.clone());
    }

    pub fn current(&self, alert_id: &AlertId) -> Vec<DeliveryIntent> {
        let mut intents: Vec<_> = self
            .current
            .get(alert_id)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default();
        sort(&mut intents);
        intents
    }

    pub fn intents(&self, alert_id: &AlertId) -> Vec<DeliveryIntent> {
        let mut intents = self.current(alert_id);
        intents.extend(
            self.archive
                .iter()
                .filter(|i| i.alert_id == *alert_id)
                .cloned(),
        );
        sort(&mut intents);
        intents
    }

    pub fn exhausted(&self) -> Vec<DeliveryIntent> {
        self.archive.clone()
    }

    pub fn pending_alert_ids(&self) -> Vec<AlertId> {
        let ids: BTreeSet<AlertId> = self
            .current
            .iter()
            .filter(|(_, entries)| entries.values().any(|i| !i.status.is_terminal()))
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter().collect()
    }
}

/// Nearest recipient first.
pub(crate) fn sort(intents: &mut [DeliveryIntent]) {
    intents.sort_by(|a, b| {
        a.distance_m
            .total_cmp(&b.distance_m)
            .then_with(|| a.recipient_session_id.cmp(&b.recipient_session_id))
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
}
