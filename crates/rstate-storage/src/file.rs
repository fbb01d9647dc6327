#![forbid(unsafe_code)]

//! JSON file backend.
//!
//! # Invariants
//!
//! - A missing file reads as `{}`.
//! - A write never leaves a truncated target: the snapshot goes to a sibling
//!   temp file which is then renamed over the target.
//!
//! # Failure Modes
//!
//! - Unreadable file or directory: [`StorageError::Io`].
//! - File content is not JSON: [`StorageError::Json`]. The file is left as
//!   is; the next successful write replaces it.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rstate_core::{StateStorage, StorageError};
use serde_json::{Map, Value};

#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from("state"));
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait(?Send)]
impl StateStorage for JsonFileStorage {
    async fn read(&self) -> Result<Value, StorageError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::debug!(
                    message = "storage.file.missing",
                    path = %self.path.display()
                );
                return Ok(Value::Object(Map::new()));
            }
            Err(err) => return Err(err.into()),
        };
        let value = serde_json::from_slice(&bytes)?;
        tracing::debug!(
            message = "storage.file.read",
            path = %self.path.display(),
            bytes = bytes.len()
        );
        Ok(value)
    }

    async fn write(&self, state: &Value) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut bytes = serde_json::to_vec_pretty(state)?;
        bytes.push(b'\n');

        let temp = self.temp_path();
        tokio::fs::write(&temp, &bytes).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        tracing::debug!(
            message = "storage.file.write",
            path = %self.path.display(),
            bytes = bytes.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstate_core::{Store, StoreConfig};
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[tokio::test]
    async fn missing_file_reads_empty_object() -> Result<(), StorageError> {
        let dir = tempfile::tempdir()?;
        let storage = JsonFileStorage::new(dir.path().join("settings.json"));
        assert_eq!(storage.read().await?, json!({}));
        Ok(())
    }

    #[tokio::test]
    async fn write_creates_parents_and_round_trips() -> Result<(), StorageError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("deeper").join("settings.json");
        let storage = JsonFileStorage::new(&path);

        storage.write(&json!({"volume": 10, "theme": {"mode": "dark"}})).await?;
        assert!(path.exists());
        assert!(!storage.temp_path().exists());
        assert_eq!(
            storage.read().await?,
            json!({"volume": 10, "theme": {"mode": "dark"}})
        );
        Ok(())
    }

    #[tokio::test]
    async fn output_is_pretty_printed() -> Result<(), StorageError> {
        let dir = tempfile::tempdir()?;
        let storage = JsonFileStorage::new(dir.path().join("s.json"));
        storage.write(&json!({"a": 1})).await?;
        let text = std::fs::read_to_string(storage.path())?;
        assert_eq!(text, "{\n  \"a\": 1\n}\n");
        Ok(())
    }

    #[tokio::test]
    async fn write_replaces_previous_content() -> Result<(), StorageError> {
        let dir = tempfile::tempdir()?;
        let storage = JsonFileStorage::new(dir.path().join("s.json"));
        storage.write(&json!({"a": 1, "b": 2})).await?;
        storage.write(&json!({"a": 3})).await?;
        assert_eq!(storage.read().await?, json!({"a": 3}));
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_file_is_a_json_error() -> Result<(), StorageError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("s.json");
        std::fs::write(&path, b"{ not json")?;
        let err = JsonFileStorage::new(&path).read().await.unwrap_err();
        assert!(matches!(err, StorageError::Json(_)));
        Ok(())
    }

    #[tokio::test]
    async fn directory_path_is_an_io_error() -> Result<(), StorageError> {
        let dir = tempfile::tempdir()?;
        let err = JsonFileStorage::new(dir.path()).read().await.unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
        Ok(())
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Settings {
        volume: u8,
        muted: bool,
    }

    #[tokio::test]
    async fn store_persists_through_file() -> rstate_core::Result<()> {
        let dir = tempfile::tempdir().map_err(StorageError::from)?;
        let path = dir.path().join("settings.json");
        std::fs::write(&path, br#"{"volume": 80, "legacy": true}"#).map_err(StorageError::from)?;

        let config = StoreConfig::new("settings", json!({"volume": 50, "muted": false}));
        let store = Store::new(config.clone(), JsonFileStorage::new(&path))?;
        let mut write_through = store.init().await?;
        store.update(json!({"muted": true}))?;
        assert_eq!(write_through.flush().await?, 1);

        let reopened = Store::new(config, JsonFileStorage::new(&path))?;
        let _wt = reopened.init().await?;
        assert_eq!(
            reopened.snapshot_as::<Settings>()?,
            Settings {
                volume: 80,
                muted: true
            }
        );
        Ok(())
    }
}
