//! File-backed key-value storage.
//!
//! One file per key under a single directory. Writes go through a temp
//! file and rename so a crash mid-write never leaves a torn value.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use calflow_core::{KeyValueStore, KvError};
use tokio::fs;

/// Durable storage rooted at a directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, KvError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(map_io)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize(key)))
    }
}

/// Keys become file names; anything outside `[A-Za-z0-9._-]` maps to `_`.
fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn map_io(e: std::io::Error) -> KvError {
    match e.kind() {
        ErrorKind::StorageFull | ErrorKind::QuotaExceeded => KvError::QuotaExceeded,
        _ => KvError::Internal(e.to_string()),
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        match fs::read_to_string(self.path_for(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(map_io(e)),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<(), KvError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value.as_bytes()).await.map_err(map_io)?;
        fs::rename(&tmp, &path).await.map_err(map_io)?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), KvError> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(map_io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::assert_ok;

    use super::*;

    #[tokio::test]
    async fn set_get_remove_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = tokio_test::assert_ok!(FileStore::open(dir.path()).await);

        store.set("sessions", "[1,2,3]".to_string()).await.unwrap();
        assert_eq!(
            store.get("sessions").await.unwrap(),
            Some("[1,2,3]".to_string())
        );

        store.remove("sessions").await.unwrap();
        assert_eq!(store.get("sessions").await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_key_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(store.get("absent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        tokio_test::assert_ok!(store.remove("never-written").await);
    }

    #[tokio::test]
    async fn keys_with_path_separators_are_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        store.set("a/b", "x".to_string()).await.unwrap();
        assert_eq!(store.get("a/b").await.unwrap(), Some("x".to_string()));
        assert!(dir.path().join("a_b.json").exists());
    }

    #[tokio::test]
    async fn overwrite_keeps_latest_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        store.set("k", "first".to_string()).await.unwrap();
        store.set("k", "second".to_string()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("second".to_string()));
    }

    #[tokio::test]
    async fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).await.unwrap();
            store.set("k", "kept".to_string()).await.unwrap();
        }
        let store = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("kept".to_string()));
    }
}
