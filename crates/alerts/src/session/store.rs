//! Durable key-value storage for session blobs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::fs;
use tokio::sync::RwLock;

use crate::entities::Session;
use crate::errors::{AlertError, AlertResult};

static KEY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,128}$").unwrap());

/// Persistent session store: a simple durable map from blob key to session.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Get storage type identifier
    fn storage_type(&self) -> &'static str;

    /// Load the session stored under `key`
    async fn get(&self, key: &str) -> AlertResult<Option<Session>>;

    /// Store `session` under `key`, replacing any previous blob
    async fn set(&self, key: &str, session: &Session) -> AlertResult<()>;
}

/// Volatile session store
#[derive(Default)]
pub struct MemorySessionStore {
    blobs: RwLock<HashMap<String, Session>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    fn storage_type(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> AlertResult<Option<Session>> {
        Ok(self.blobs.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, session: &Session) -> AlertResult<()> {
        self.blobs
            .write()
            .await
            .insert(key.to_string(), session.clone());
        Ok(())
    }
}

/// One JSON file per key under `<data_dir>/sessions/`
pub struct FileSessionStore {
    sessions_dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            sessions_dir: data_dir.as_ref().join("sessions"),
        }
    }

    fn path_for(&self, key: &str) -> AlertResult<PathBuf> {
        if !KEY_PATTERN.is_match(key) {
            return Err(AlertError::InvalidArgument {
                field: "device_key",
                reason: "use 1-128 letters, digits, '-' or '_'".to_string(),
            });
        }
        Ok(self.sessions_dir.join(format!("{key}.json")))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    fn storage_type(&self) -> &'static str {
        "file"
    }

    async fn get(&self, key: &str) -> AlertResult<Option<Session>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AlertError::StorageUnavailable {
                reason: format!("cannot read '{}': {e}", path.display()),
            }),
        }
    }

    async fn set(&self, key: &str, session: &Session) -> AlertResult<()> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.sessions_dir).await?;

        let content = serde_json::to_string_pretty(session)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(temp_dir.path());
        assert!(store.get("phone-1").await.unwrap().is_none());

        let session = Session::anonymous(Utc::now());
        store.set("phone-1", &session).await.unwrap();
        assert_eq!(store.get("phone-1").await.unwrap(), Some(session));
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_like_keys() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(temp_dir.path());
        let err = store.get("../etc/passwd").await.unwrap_err();
        assert_eq!(err.field(), Some("device_key"));
    }

    #[tokio::test]
    async fn test_memory_store_overwrites() {
        let store = MemorySessionStore::new();
        let first = Session::anonymous(Utc::now());
        let second = Session::anonymous(Utc::now());
        store.set("k", &first).await.unwrap();
        store.set("k", &second).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(second));
    }
}
