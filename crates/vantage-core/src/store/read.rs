//! Read path: entry lookup, access bookkeeping, listings.

use std::path::Path;

use chrono::Utc;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{DeliveryError, DeliveryResult};
use crate::types::Response;

use super::{io, keys, CacheEntry, EntryMeta, Partition};

pub(super) async fn get_impl(partition: &Partition, key: &str) -> DeliveryResult<Option<CacheEntry>> {
    let entry_dir = partition.entry_dir(key);
    let meta_path = entry_dir.join("entry.json");
    let body_path = entry_dir.join("body.bin");

    if !meta_path.exists() || !body_path.exists() {
        debug!(partition = %partition.name, key, "entry not in partition");
        return Ok(None);
    }

    let mut meta = read_meta(&meta_path).await?;

    let body = fs::read(&body_path)
        .await
        .map_err(|e| DeliveryError::storage("failed to read cached body", e))?;

    let actual = keys::body_digest(&body);
    if actual != meta.body_digest {
        warn!(
            partition = %partition.name,
            key,
            expected = %meta.body_digest,
            actual = %actual,
            "cache integrity check failed"
        );
        return Err(DeliveryError::Storage {
            message: format!("digest mismatch for cached entry {key}"),
        });
    }

    meta.access_count = meta.access_count.saturating_add(1);
    meta.last_accessed_at = Utc::now();
    if let Err(e) = record_access(partition, &meta_path, &meta).await {
        debug!(partition = %partition.name, key, error = %e, "failed to record access");
    }

    debug!(partition = %partition.name, key, "partition hit");
    Ok(Some(CacheEntry {
        key: meta.key,
        response: Response {
            status: meta.status,
            headers: meta.headers,
            body: body.into(),
        },
        stored_at: meta.stored_at,
        ttl: std::time::Duration::from_millis(meta.ttl_ms),
        priority: meta.priority,
        access_count: meta.access_count,
        last_accessed_at: meta.last_accessed_at,
        size_bytes: meta.size_bytes,
    }))
}

/// Write access bookkeeping unless the entry was replaced since it was read.
pub(super) async fn record_access(partition: &Partition, meta_path: &Path, read: &EntryMeta) -> DeliveryResult<()> {
    let _guard = partition.writes.lock().await;
    let on_disk = read_meta(meta_path).await?;
    if on_disk.body_digest != read.body_digest || on_disk.stored_at != read.stored_at {
        debug!(partition = %partition.name, key = %read.key, "entry replaced during read");
        return Ok(());
    }
    write_meta(meta_path, read).await
}

pub(super) async fn read_meta(meta_path: &Path) -> DeliveryResult<EntryMeta> {
    let content = fs::read_to_string(meta_path)
        .await
        .map_err(|e| DeliveryError::storage("failed to read entry metadata", e))?;
    serde_json::from_str(&content)
        .map_err(|e| DeliveryError::storage("failed to parse entry metadata", e))
}

pub(super) async fn write_meta(meta_path: &Path, meta: &EntryMeta) -> DeliveryResult<()> {
    let json = serde_json::to_vec_pretty(meta)
        .map_err(|e| DeliveryError::storage("failed to serialize entry metadata", e))?;
    io::write_atomic(meta_path, &json).await
}

/// Metadata of every readable entry. Unreadable entries are skipped.
pub(super) async fn list_meta_impl(partition: &Partition) -> DeliveryResult<Vec<EntryMeta>> {
    let mut result = Vec::new();

    if !partition.dir.exists() {
        return Ok(result);
    }

    let mut entries = fs::read_dir(&partition.dir)
        .await
        .map_err(|e| DeliveryError::storage("failed to read partition directory", e))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| DeliveryError::storage("failed to read directory entry", e))?
    {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        match read_meta(&path.join("entry.json")).await {
            Ok(meta) => result.push(meta),
            Err(e) => debug!(path = %path.display(), error = %e, "skipping unreadable entry"),
        }
    }

    Ok(result)
}

pub(super) async fn list_partitions_impl(root: &Path) -> DeliveryResult<Vec<String>> {
    let mut result = Vec::new();

    if !root.exists() {
        return Ok(result);
    }

    let mut entries = fs::read_dir(root)
        .await
        .map_err(|e| DeliveryError::storage("failed to read partition root", e))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| DeliveryError::storage("failed to read directory entry", e))?
    {
        if entry.path().is_dir() {
            result.push(entry.file_name().to_string_lossy().to_string());
        }
    }

    result.sort();
    Ok(result)
}
