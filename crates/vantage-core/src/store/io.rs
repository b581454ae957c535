//! Filesystem helpers: directory creation and atomic writes.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::fs;

use crate::error::{DeliveryError, DeliveryResult};

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

pub(crate) async fn ensure_dir(dir: &Path) -> DeliveryResult<()> {
    fs::create_dir_all(dir)
        .await
        .map_err(|e| DeliveryError::storage("failed to create cache directory", e))
}

/// Create one entry directory inside an existing partition.
///
/// Never recreates the partition itself: a put that lands after its
/// partition was deleted fails instead of resurrecting it.
pub(crate) async fn create_entry_dir(dir: &Path) -> DeliveryResult<()> {
    match fs::create_dir(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(DeliveryError::Storage {
            message: format!("partition retired: {}", dir.display()),
        }),
        Err(e) => Err(DeliveryError::storage("failed to create entry directory", e)),
    }
}

/// Write to a uniquely named temp file, then rename over `path`.
///
/// Concurrent writers never share a temp file; the last rename wins.
pub(crate) async fn write_atomic(path: &Path, content: &[u8]) -> DeliveryResult<()> {
    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let temp_path = path.with_extension(format!("{}.{}.tmp", std::process::id(), seq));

    fs::write(&temp_path, content)
        .await
        .map_err(|e| DeliveryError::storage("failed to write temp file", e))?;

    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(DeliveryError::storage("failed to rename temp file", e));
    }

    Ok(())
}
