//! File-backed key/value mirror for persistent high-priority entries.
//!
//! One JSON file per key: `{dir}/{sha256(key)}.json`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::error::{DeliveryError, DeliveryResult};
use crate::store::{io, keys};
use crate::types::PriorityTier;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct MirrorRecord<V> {
    pub key: String,
    pub value: V,
    pub stored_at: DateTime<Utc>,
    pub ttl_ms: u64,
    pub priority: PriorityTier,
}

#[derive(Debug, Clone)]
pub(crate) struct Mirror {
    dir: PathBuf,
}

impl Mirror {
    pub(crate) fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", keys::key_digest(key)))
    }

    pub(crate) async fn write<V: Serialize>(&self, record: &MirrorRecord<V>) -> DeliveryResult<()> {
        io::ensure_dir(&self.dir).await?;
        let json = serde_json::to_vec(record)
            .map_err(|e| DeliveryError::storage("failed to serialize mirror record", e))?;
        io::write_atomic(&self.record_path(&record.key), &json).await
    }

    pub(crate) async fn remove(&self, key: &str) -> DeliveryResult<()> {
        remove_file(&self.record_path(key)).await
    }

    /// Remove every record file.
    pub(crate) async fn clear(&self) -> DeliveryResult<()> {
        if !self.dir.exists() {
            return Ok(());
        }
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| DeliveryError::storage("failed to read mirror directory", e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DeliveryError::storage("failed to read directory entry", e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                remove_file(&path).await?;
            }
        }
        Ok(())
    }

    /// Every readable record with its path. Corrupt files are deleted.
    pub(crate) async fn load_all<V: DeserializeOwned>(
        &self,
    ) -> DeliveryResult<Vec<(PathBuf, MirrorRecord<V>)>> {
        let mut result = Vec::new();
        if !self.dir.exists() {
            return Ok(result);
        }

        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| DeliveryError::storage("failed to read mirror directory", e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DeliveryError::storage("failed to read directory entry", e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = fs::read(&path)
                .await
                .ok()
                .and_then(|bytes| serde_json::from_slice::<MirrorRecord<V>>(&bytes).ok());
            match parsed {
                Some(record) => result.push((path, record)),
                None => {
                    debug!(path = %path.display(), "dropping unreadable mirror record");
                    remove_file(&path).await?;
                }
            }
        }

        Ok(result)
    }

    pub(crate) async fn remove_path(&self, path: &Path) -> DeliveryResult<()> {
        remove_file(path).await
    }
}

async fn remove_file(path: &Path) -> DeliveryResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DeliveryError::storage("failed to remove mirror record", e)),
    }
}
