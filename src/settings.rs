//! Durable per-device settings.
//!
//! Holds the manual override base URL. The file store keeps a flat JSON
//! object so unrelated keys written by other components survive updates.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Key under which the manual override is stored.
pub const MANUAL_OVERRIDE_KEY: &str = "local_base_url_override";

/// Error types for settings persistence.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Settings I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Durable key/value settings used by the resolver.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Raw stored override, if any. Validation is the caller's concern.
    async fn manual_override(&self) -> Result<Option<String>, SettingsError>;

    /// Store an override, or clear it with `None`. Returns once durable.
    async fn set_manual_override(&self, value: Option<&str>) -> Result<(), SettingsError>;
}

// ============================================================================
// JSON file
// ============================================================================

/// Settings persisted as a JSON object on disk.
pub struct FileSettingsStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_map(&self) -> Result<Map<String, Value>, SettingsError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No settings file yet");
                return Ok(Map::new());
            }
            Err(source) => {
                return Err(SettingsError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Map::new());
        }

        serde_json::from_slice(&bytes).map_err(|source| SettingsError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    async fn write_map(&self, map: &Map<String, Value>) -> Result<(), SettingsError> {
        let io_err = |source| SettingsError::Io {
            path: self.path.clone(),
            source,
        };

        let body = serde_json::to_vec_pretty(map).map_err(|source| SettingsError::Parse {
            path: self.path.clone(),
            source,
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        // Write-then-rename so a crash never leaves a truncated file.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    async fn manual_override(&self) -> Result<Option<String>, SettingsError> {
        let map = self.read_map().await?;
        Ok(map
            .get(MANUAL_OVERRIDE_KEY)
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    async fn set_manual_override(&self, value: Option<&str>) -> Result<(), SettingsError> {
        let _guard = self.write_lock.lock().await;
        let mut map = match self.read_map().await {
            Ok(map) => map,
            Err(SettingsError::Parse { path, source }) => {
                warn!(path = %path.display(), error = %source, "Discarding malformed settings file");
                Map::new()
            }
            Err(e) => return Err(e),
        };

        match value {
            Some(value) => {
                map.insert(MANUAL_OVERRIDE_KEY.to_string(), Value::String(value.to_string()));
            }
            None => {
                map.remove(MANUAL_OVERRIDE_KEY);
            }
        }

        self.write_map(&map).await?;
        info!(path = %self.path.display(), set = value.is_some(), "Manual override saved");
        Ok(())
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Volatile settings, for tests and hosts that persist elsewhere.
#[derive(Default)]
pub struct MemorySettingsStore {
    manual_override: Mutex<Option<String>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_override(value: impl Into<String>) -> Self {
        Self {
            manual_override: Mutex::new(Some(value.into())),
        }
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn manual_override(&self) -> Result<Option<String>, SettingsError> {
        Ok(self.manual_override.lock().await.clone())
    }

    async fn set_manual_override(&self, value: Option<&str>) -> Result<(), SettingsError> {
        *self.manual_override.lock().await = value.map(str::to_string);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSettingsStore::new(dir.path().join("settings.json"));
        assert_eq!(store.manual_override().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let store = FileSettingsStore::new(&path);

        store.set_manual_override(Some("http://192.168.1.20:3000")).await.unwrap();
        assert_eq!(
            store.manual_override().await.unwrap().as_deref(),
            Some("http://192.168.1.20:3000")
        );

        // A fresh store over the same file sees the persisted value.
        let reopened = FileSettingsStore::new(&path);
        assert_eq!(
            reopened.manual_override().await.unwrap().as_deref(),
            Some("http://192.168.1.20:3000")
        );

        store.set_manual_override(None).await.unwrap();
        assert_eq!(reopened.manual_override().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_preserves_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        tokio::fs::write(&path, br#"{"theme":"dark"}"#).await.unwrap();

        let store = FileSettingsStore::new(&path);
        store.set_manual_override(Some("http://10.0.0.5:3000")).await.unwrap();

        let raw: Map<String, Value> = serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
        assert_eq!(raw.get("theme").and_then(Value::as_str), Some("dark"));
        assert_eq!(
            raw.get(MANUAL_OVERRIDE_KEY).and_then(Value::as_str),
            Some("http://10.0.0.5:3000")
        );
    }

    #[tokio::test]
    async fn test_file_store_malformed_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let store = FileSettingsStore::new(&path);
        assert!(matches!(store.manual_override().await, Err(SettingsError::Parse { .. })));
    }

    #[tokio::test]
    async fn test_file_store_write_recovers_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();
        let store = FileSettingsStore::new(&path);

        store.set_manual_override(Some("http://192.168.1.20:3000")).await.unwrap();
        assert_eq!(
            store.manual_override().await.unwrap().as_deref(),
            Some("http://192.168.1.20:3000")
        );

        tokio::fs::write(&path, b"[1, 2").await.unwrap();
        store.set_manual_override(None).await.unwrap();
        assert_eq!(store.manual_override().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemorySettingsStore::with_override("http://10.0.0.5:3000");
        assert_eq!(store.manual_override().await.unwrap().as_deref(), Some("http://10.0.0.5:3000"));
        store.set_manual_override(None).await.unwrap();
        assert_eq!(store.manual_override().await.unwrap(), None);
    }
}
