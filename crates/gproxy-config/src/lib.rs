//! Config Store: load/validate/hot-reload the declarative configuration
//! document and publish immutable snapshots for the rest of the gateway.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use arc_swap::ArcSwap;
use gproxy_common::ConfigDocument;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};

/// How often `reloadIfChanged` is polled by the background task.
pub const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("validate config file {path}: {source}")]
    Validate {
        path: PathBuf,
        #[source]
        source: gproxy_common::ConfigError,
    },
    #[error("serialize config: {0}")]
    Serialize(anyhow::Error),
    #[error("write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn parse_document(path: &Path, contents: &str) -> Result<ConfigDocument, anyhow::Error> {
    if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
        Ok(serde_json::from_str(contents)?)
    } else {
        Ok(serde_yaml::from_str(contents)?)
    }
}

fn serialize_document(path: &Path, doc: &ConfigDocument) -> Result<String, anyhow::Error> {
    if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
        Ok(serde_json::to_string_pretty(doc)?)
    } else {
        Ok(serde_yaml::to_string(doc)?)
    }
}

fn load_and_validate(path: &Path) -> Result<ConfigDocument, StoreError> {
    let contents = std::fs::read_to_string(path).map_err(|source| StoreError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let doc = parse_document(path, &contents).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    doc.validate().map_err(|source| StoreError::Validate {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(doc)
}

fn file_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).ok()?.modified().ok()
}

/// Owns the in-memory `configSnapshot` and the on-disk document backing it.
pub struct ConfigStore {
    path: PathBuf,
    snapshot: ArcSwap<ConfigDocument>,
    // Guards the read-mtime-then-swap sequence so reloadIfChanged never races
    // itself (the poll loop and an admin-triggered write can both call it).
    reload_lock: AsyncMutex<Option<SystemTime>>,
}

impl ConfigStore {
    /// Load, validate, and wrap the document at `path` as the initial snapshot.
    pub fn load(path: impl Into<PathBuf>) -> Result<Arc<Self>, StoreError> {
        let path = path.into();
        let doc = load_and_validate(&path)?;
        let mtime = file_mtime(&path);
        Ok(Arc::new(Self {
            path,
            snapshot: ArcSwap::from_pointee(doc),
            reload_lock: AsyncMutex::new(mtime),
        }))
    }

    /// The current immutable document. O(1), lock-free for readers.
    pub fn snapshot(&self) -> Arc<ConfigDocument> {
        self.snapshot.load_full()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stat the backing file; if its mtime advanced, parse and validate the
    /// new contents and swap the snapshot in. Validation failures are logged
    /// and the previous snapshot is retained. Returns whether a swap happened.
    pub async fn reload_if_changed(&self) -> Result<bool, StoreError> {
        let mut last_seen = self.reload_lock.lock().await;
        let current_mtime = file_mtime(&self.path);
        if current_mtime == *last_seen {
            return Ok(false);
        }

        match load_and_validate(&self.path) {
            Ok(doc) => {
                self.snapshot.store(Arc::new(doc));
                *last_seen = current_mtime;
                info!(event = "config_reloaded", path = %self.path.display());
                Ok(true)
            }
            Err(err) => {
                warn!(event = "config_reload_failed", path = %self.path.display(), error = %err);
                // The file changed but failed to validate: remember its mtime
                // so we don't retry the same broken content every tick, but
                // keep serving the last-good snapshot.
                *last_seen = current_mtime;
                Err(err)
            }
        }
    }

    /// Validate, serialize, and atomically replace the backing file
    /// (write-to-temp + rename), then publish the new snapshot immediately.
    pub async fn write(&self, doc: ConfigDocument) -> Result<(), StoreError> {
        doc.validate().map_err(|source| StoreError::Validate {
            path: self.path.clone(),
            source,
        })?;
        let rendered = serialize_document(&self.path, &doc).map_err(StoreError::Serialize)?;

        let tmp_path = self.path.with_extension(format!(
            "{}.tmp",
            self.path
                .extension()
                .and_then(|ext| ext.to_str())
                .unwrap_or("tmp")
        ));
        tokio::fs::write(&tmp_path, rendered.as_bytes())
            .await
            .map_err(|source| StoreError::Write {
                path: tmp_path.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|source| StoreError::Write {
                path: self.path.clone(),
                source,
            })?;

        let mut last_seen = self.reload_lock.lock().await;
        *last_seen = file_mtime(&self.path);
        self.snapshot.store(Arc::new(doc));
        Ok(())
    }

    /// Spawn the background poll task. Runs until the process exits, calling
    /// `on_reload` with the fresh snapshot every time the file actually
    /// changes (e.g. to refresh the Provider Pool, which the Config Store
    /// itself knows nothing about).
    pub fn spawn_poll_loop(
        self: Arc<Self>,
        on_reload: impl Fn(Arc<ConfigDocument>) + Send + 'static,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.reload_if_changed().await {
                    Ok(true) => on_reload(self.snapshot()),
                    Ok(false) => {}
                    Err(err) => error!(event = "config_poll_error", error = %err),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(contents: &str, ext: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("config.{ext}"));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        (dir, path)
    }

    const VALID_YAML: &str = r#"
api_key: local-secret
providers:
  - provider: a
    base_url: https://api.example.com
    api_key: up-secret
"#;

    #[tokio::test]
    async fn load_reads_and_validates_yaml() {
        let (_dir, path) = write_tmp(VALID_YAML, "yaml");
        let store = ConfigStore::load(&path).unwrap();
        assert_eq!(store.snapshot().api_key, "local-secret");
    }

    #[tokio::test]
    async fn reload_if_changed_detects_and_swaps() {
        let (_dir, path) = write_tmp(VALID_YAML, "yaml");
        let store = ConfigStore::load(&path).unwrap();
        assert!(!store.reload_if_changed().await.unwrap());

        // Bump mtime with new content.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let updated = VALID_YAML.replace("local-secret", "new-secret");
        tokio::fs::write(&path, updated).await.unwrap();

        assert!(store.reload_if_changed().await.unwrap());
        assert_eq!(store.snapshot().api_key, "new-secret");
    }

    #[tokio::test]
    async fn reload_keeps_previous_snapshot_on_invalid_content() {
        let (_dir, path) = write_tmp(VALID_YAML, "yaml");
        let store = ConfigStore::load(&path).unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        tokio::fs::write(&path, "api_key: \"\"\n").await.unwrap();

        assert!(store.reload_if_changed().await.is_err());
        assert_eq!(store.snapshot().api_key, "local-secret");
    }

    #[tokio::test]
    async fn write_is_atomic_and_updates_snapshot() {
        let (_dir, path) = write_tmp(VALID_YAML, "yaml");
        let store = ConfigStore::load(&path).unwrap();

        let mut doc = store.snapshot().as_ref().clone();
        doc.api_key = "rotated-secret".to_string();
        store.write(doc).await.unwrap();

        assert_eq!(store.snapshot().api_key, "rotated-secret");
        let reloaded = ConfigStore::load(&path).unwrap();
        assert_eq!(reloaded.snapshot().api_key, "rotated-secret");
    }
}
