//! Entry deletion and version busting.

use std::path::Path;

use tokio::fs;
use tracing::{debug, info};

use crate::error::{DeliveryError, DeliveryResult};

use super::{keys, read, Partition};

pub(super) async fn delete_impl(partition: &Partition, key: &str) -> DeliveryResult<bool> {
    let entry_dir = partition.entry_dir(key);

    if !entry_dir.exists() {
        return Ok(false);
    }

    fs::remove_dir_all(&entry_dir)
        .await
        .map_err(|e| DeliveryError::storage("failed to delete cache entry", e))?;
    debug!(partition = %partition.name, key, "deleted entry");
    Ok(true)
}

pub(super) async fn delete_unversioned_impl(
    root: &Path,
    current_version: &str,
) -> DeliveryResult<Vec<String>> {
    let mut removed = Vec::new();

    for name in read::list_partitions_impl(root).await? {
        if keys::is_version(&name, current_version) {
            continue;
        }
        fs::remove_dir_all(root.join(&name))
            .await
            .map_err(|e| DeliveryError::storage("failed to delete partition", e))?;
        removed.push(name);
    }

    if !removed.is_empty() {
        info!(version = current_version, removed = ?removed, "deleted stale partitions");
    }
    Ok(removed)
}
