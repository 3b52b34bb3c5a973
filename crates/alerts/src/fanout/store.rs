//! Delivery intent persistence.
//!
//! The dispatcher writes every intent through to a [`DeliveryStore`] before
//! a dispatch returns and after every attempt, so a restarted process knows
//! which recipients were already notified and which still are owed a push.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{error, info};

use super::book::{BookFile, DeliveryBook};
use crate::entities::{AlertId, DeliveryIntent};
use crate::errors::{AlertError, AlertResult};

/// Delivery file name inside the data directory
pub const DELIVERIES_FILE: &str = "deliveries.json";

/// Durable record of delivery intents.
///
/// Holds at most one current intent per `(alert, recipient)` pair. Recording
/// an Exhausted intent archives it and frees the pair.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Get storage type identifier
    fn storage_type(&self) -> &'static str;

    /// Write the latest state of each intent.
    async fn record(&self, intents: &[DeliveryIntent]) -> AlertResult<()>;

    /// Current (non-archived) intents of an alert
    async fn current(&self, alert_id: &AlertId) -> AlertResult<Vec<DeliveryIntent>>;

    /// Current and archived intents of an alert
    async fn intents(&self, alert_id: &AlertId) -> AlertResult<Vec<DeliveryIntent>>;

    /// Archived intents that ran out of attempts
    async fn exhausted(&self) -> AlertResult<Vec<DeliveryIntent>>;

    /// Alerts with Pending or Failed intents
    async fn pending_alert_ids(&self) -> AlertResult<Vec<AlertId>>;
}

/// Volatile delivery store
#[derive(Default)]
pub struct MemoryDeliveryStore {
    book: RwLock<DeliveryBook>,
}

impl MemoryDeliveryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeliveryStore for MemoryDeliveryStore {
    fn storage_type(&self) -> &'static str {
        "memory"
    }

    async fn record(&self, intents: &[DeliveryIntent]) -> AlertResult<()> {
        let mut book = self.book.write().await;
        for intent in intents {
            book.record(intent);
        }
        Ok(())
    }

    async fn current(&self, alert_id: &AlertId) -> AlertResult<Vec<DeliveryIntent>> {
        Ok(self.book.read().await.current(alert_id))
    }

    async fn intents(&self, alert_id: &AlertId) -> AlertResult<Vec<DeliveryIntent>> {
        Ok(self.book.read().await.intents(alert_id))
    }

    async fn exhausted(&self) -> AlertResult<Vec<DeliveryIntent>> {
        Ok(self.book.read().await.exhausted())
    }

    async fn pending_alert_ids(&self) -> AlertResult<Vec<AlertId>> {
        Ok(self.book.read().await.pending_alert_ids())
    }
}

/// Delivery store backed by `deliveries.json`.
///
/// Same write discipline as the alert ledger file: the book is rewritten
/// through a temp file and a rename, and the in-memory view only changes
/// once the file is in place.
pub struct FileDeliveryStore {
    path: PathBuf,
    book: RwLock<DeliveryBook>,
}

impl FileDeliveryStore {
    /// Open (or create) the book at `data_dir/deliveries.json`.
    pub async fn open(data_dir: impl AsRef<Path>) -> AlertResult<Self> {
        let path = data_dir.as_ref().join(DELIVERIES_FILE);
        let file: BookFile = match fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => BookFile::default(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BookFile::default(),
            Err(e) => {
                return Err(AlertError::StorageUnavailable {
                    reason: format!("cannot read '{}': {e}", path.display()),
                })
            }
        };

        let book = DeliveryBook::from_file(file)?;
        info!(
            path = %path.display(),
            pending_alerts = book.pending_alert_ids().len(),
            "Opened delivery book"
        );
        Ok(Self {
            path,
            book: RwLock::new(book),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, book: &DeliveryBook) -> AlertResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(&book.to_file())?;

        let tmp = self.path.with_extension("json.tmp");
        let written = async {
            fs::write(&tmp, content).await?;
            fs::rename(&tmp, &self.path).await
        }
        .await;

        written.map_err(|e| {
            error!(path = %self.path.display(), error = %e, "Failed to write delivery book");
            AlertError::StorageUnavailable {
                reason: format!("cannot write '{}': {e}", self.path.display()),
            }
        })
    }
}

#[async_trait]
impl DeliveryStore for FileDeliveryStore {
    fn storage_type(&self) -> &'static str {
        "file"
    }

    async fn record(&self, intents: &[DeliveryIntent]) -> AlertResult<()> {
        if intents.is_empty() {
            return Ok(());
        }
        let mut book = self.book.write().await;
        let mut next = book.clone();
        for intent in intents {
            next.record(intent);
        }
        self.persist(&next).await?;
        *book = next;
        Ok(())
    }

    async fn current(&self, alert_id: &AlertId) -> AlertResult<Vec<DeliveryIntent>> {
        Ok(self.book.read().await.current(alert_id))
    }

    async fn intents(&self, alert_id: &AlertId) -> AlertResult<Vec<DeliveryIntent>> {
        Ok(self.book.read().await.intents(alert_id))
    }

    async fn exhausted(&self) -> AlertResult<Vec<DeliveryIntent>> {
        Ok(self.book.read().await.exhausted())
    }

    async fn pending_alert_ids(&self) -> AlertResult<Vec<AlertId>> {
        Ok(self.book.read().await.pending_alert_ids())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{DeliveryStatus, SessionId};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let alert = AlertId::generate();
        let sent = DeliveryIntent {
            status: DeliveryStatus::Sent,
            attempt: 1,
            ..DeliveryIntent::new(alert, SessionId::generate(), 14.0)
        };
        let failed = DeliveryIntent {
            status: DeliveryStatus::Failed,
            attempt: 2,
            last_error: Some("gateway timeout".to_string()),
            ..DeliveryIntent::new(alert, SessionId::generate(), 80.0)
        };

        let store = FileDeliveryStore::open(temp_dir.path()).await.unwrap();
        store.record(&[sent.clone(), failed.clone()]).await.unwrap();
        drop(store);

        let store = FileDeliveryStore::open(temp_dir.path()).await.unwrap();
        assert_eq!(store.current(&alert).await.unwrap(), vec![sent, failed]);
        assert_eq!(store.pending_alert_ids().await.unwrap(), vec![alert]);
        assert!(!temp_dir.path().join("deliveries.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_book_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        let data_dir = temp_dir.path().join("data");
        let store = FileDeliveryStore::open(&data_dir).await.unwrap();

        std::fs::write(&data_dir, "").unwrap();
        let alert = AlertId::generate();
        let err = store
            .record(&[DeliveryIntent::new(alert, SessionId::generate(), 5.0)])
            .await
            .unwrap_err();
        assert!(matches!(err, AlertError::StorageUnavailable { .. }));
        assert!(store.current(&alert).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_book_is_storage_error() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join(DELIVERIES_FILE), "[oops").unwrap();
        let err = FileDeliveryStore::open(temp_dir.path()).await.err().unwrap();
        assert!(matches!(err, AlertError::StorageUnavailable { .. }));
    }
}
