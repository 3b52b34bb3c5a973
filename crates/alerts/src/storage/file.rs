//! File-backed alert store.
//!
//! The whole ledger is a JSON array on disk, loaded once on open. Every
//! mutation rewrites it through a temp file and a rename, so a reader never
//! sees a half-written ledger. The write lock is held across the disk write,
//! and the in-memory view only changes once the file is in place.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use super::ledger::Ledger;
use super::traits::AlertStore;
use crate::clock::{Clock, SystemClock};
use crate::entities::{Alert, AlertAmendment, AlertId, NewAlert, SessionId};
use crate::errors::{AlertError, AlertResult};

/// Ledger file name inside the data directory
pub const LEDGER_FILE: &str = "alerts.json";

/// Durable alert store backed by a single JSON file
pub struct FileAlertStore {
    path: PathBuf,
    ledger: RwLock<Ledger>,
    clock: Arc<dyn Clock>,
}

impl FileAlertStore {
    /// Open (or create) the ledger at `data_dir/alerts.json`.
    pub async fn open(data_dir: impl AsRef<Path>) -> AlertResult<Self> {
        Self::open_with_clock(data_dir, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock(
        data_dir: impl AsRef<Path>,
        clock: Arc<dyn Clock>,
    ) -> AlertResult<Self> {
        let path = data_dir.as_ref().join(LEDGER_FILE);
        let alerts: Vec<Alert> = match fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => Vec::new(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(AlertError::StorageUnavailable {
                    reason: format!("cannot read '{}': {e}", path.display()),
                })
            }
        };

        info!(path = %path.display(), alerts = alerts.len(), "Opened alert ledger");
        Ok(Self {
            path,
            ledger: RwLock::new(Ledger::from_alerts(alerts)?),
            clock,
        })
    }

    /// Path of the ledger file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, ledger: &Ledger) -> AlertResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let alerts: Vec<&Alert> = ledger.iter().collect();
        let content = serde_json::to_string_pretty(&alerts)?;

        let tmp = self.path.with_extension("json.tmp");
        let written = async {
            fs::write(&tmp, content).await?;
            fs::rename(&tmp, &self.path).await
        }
        .await;

        written.map_err(|e| {
            error!(path = %self.path.display(), error = %e, "Failed to write alert ledger");
            AlertError::StorageUnavailable {
                reason: format!("cannot write '{}': {e}", self.path.display()),
            }
        })
    }
}

#[async_trait]
impl AlertStore for FileAlertStore {
    fn storage_type(&self) -> &'static str {
        "file"
    }

    async fn append(&self, alert: NewAlert) -> AlertResult<Alert> {
        let mut ledger = self.ledger.write().await;
        let alert = ledger.materialize(alert, self.clock.now())?;

        ledger.insert(alert.clone());
        if let Err(e) = self.persist(&ledger).await {
            ledger.remove(&alert.id);
            return Err(e);
        }

        debug!(alert_id = %alert.id, "Alert appended to ledger file");
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
        if amendment.is_empty() {
            return Ok(updated);
        }

        let previous = ledger.get(alert_id).cloned();
        ledger.replace(updated.clone());
        if let Err(e) = self.persist(&ledger).await {
            if let Some(previous) = previous {
                ledger.replace(previous);
            }
            return Err(e);
        }
        Ok(updated)
    }

    async fn count(&self) -> AlertResult<usize> {
        Ok(self.ledger.read().await.len())
    }

    async fn count_since(&self, since: DateTime<Utc>) -> AlertResult<usize> {
        Ok(self.ledger.read().await.count_since(since))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Classification, GeoPoint, MediaKind, MediaRef};
    use tempfile::TempDir;

    fn report(reporter: SessionId) -> NewAlert {
        NewAlert::new(
            reporter,
            GeoPoint::new(40.7589, -73.9851),
            Classification::Suspicious,
            "Persona sospechosa",
        )
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let reporter = SessionId::generate();

        let now = Utc::now();
        let store = FileAlertStore::open(temp_dir.path()).await.unwrap();
        let first = store
            .append(report(reporter).at(now - chrono::Duration::minutes(5)))
            .await
            .unwrap();
        let second = store
            .append(report(reporter).at(now).with_media(vec![MediaRef {
                kind: MediaKind::Photo,
                uri: "file:///photos/1.jpg".to_string(),
            }]))
            .await
            .unwrap();
        drop(store);

        let store = FileAlertStore::open(temp_dir.path()).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
        let recent = store.recent(2).await.unwrap();
        assert_eq!(recent[0], second);
        assert_eq!(recent[1], first);
        assert!(!temp_dir.path().join("alerts.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_amend_is_persisted() {
        let temp_dir = TempDir::new().unwrap();
        let reporter = SessionId::generate();
        let store = FileAlertStore::open(temp_dir.path()).await.unwrap();
        let alert = store.append(report(reporter)).await.unwrap();

        store
            .amend(
                &alert.id,
                &reporter,
                &AlertAmendment {
                    classification: Some(Classification::Robbery),
                    details: None,
                },
            )
            .await
            .unwrap();
        drop(store);

        let store = FileAlertStore::open(temp_dir.path()).await.unwrap();
        let reloaded = store.get(&alert.id).await.unwrap().unwrap();
        assert_eq!(reloaded.classification, Classification::Robbery);
        assert_eq!(reloaded.details, "Persona sospechosa");
    }

    #[tokio::test]
    async fn test_corrupt_ledger_is_storage_error() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join(LEDGER_FILE), "{ not json").unwrap();

        let err = FileAlertStore::open(temp_dir.path()).await.err().unwrap();
        assert!(matches!(err, AlertError::StorageUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_unwritable_directory_is_storage_error() {
        let temp_dir = TempDir::new().unwrap();
        let data_dir = temp_dir.path().join("data");
        let store = FileAlertStore::open(&data_dir).await.unwrap();

        // A plain file where the data directory should be
        std::fs::write(&data_dir, "").unwrap();
        let err = store.append(report(SessionId::generate())).await.unwrap_err();
        assert!(matches!(err, AlertError::StorageUnavailable { .. }));
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
