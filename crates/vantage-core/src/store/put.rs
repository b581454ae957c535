//! Write path and budget trimming.

use tracing::{debug, info};

use crate::error::DeliveryResult;

use super::read::{list_meta_impl, write_meta};
use super::{io, keys, CacheEntry, EntryMeta, Partition};

pub(super) async fn put_impl(partition: &Partition, entry: &CacheEntry) -> DeliveryResult<()> {
    let entry_dir = partition.entry_dir(&entry.key);
    io::create_entry_dir(&entry_dir).await?;

    let meta = EntryMeta {
        key: entry.key.clone(),
        status: entry.response.status,
        headers: entry.response.headers.clone(),
        stored_at: entry.stored_at,
        ttl_ms: entry.ttl.as_millis() as u64,
        priority: entry.priority,
        access_count: entry.access_count,
        last_accessed_at: entry.last_accessed_at,
        size_bytes: entry.response.body.len() as u64,
        body_digest: keys::body_digest(&entry.response.body),
    };

    io::write_atomic(&entry_dir.join("body.bin"), &entry.response.body).await?;
    write_meta(&entry_dir.join("entry.json"), &meta).await?;

    debug!(partition = %partition.name, key = %entry.key, size = meta.size_bytes, "stored entry");
    Ok(())
}

/// Drop least-recently-accessed entries until the partition fits its budget.
pub(super) async fn trim_impl(partition: &Partition) -> DeliveryResult<()> {
    let mut metas = list_meta_impl(partition).await?;

    let mut total: u64 = metas.iter().map(|m| m.size_bytes).sum();
    let mut count = metas.len();
    if total <= partition.spec.max_bytes && count <= partition.spec.max_entries {
        return Ok(());
    }

    metas.sort_by(|a, b| a.last_accessed_at.cmp(&b.last_accessed_at));

    let mut removed = 0usize;
    for meta in metas {
        if total <= partition.spec.max_bytes && count <= partition.spec.max_entries {
            break;
        }
        if super::evict::delete_impl(partition, &meta.key).await? {
            total = total.saturating_sub(meta.size_bytes);
            count -= 1;
            removed += 1;
        }
    }

    info!(
        partition = %partition.name,
        removed,
        remaining = count,
        bytes = total,
        "trimmed partition to budget"
    );
    Ok(())
}
