//! Durable, versioned cache partitions.
//!
//! Each resource class owns one partition per deploy version. Entries carry
//! their own metadata and a body digest that is verified on read.
//!
//! # Layout
//!
//! ```text
//! {root}/{family}-{version}/{sha256(key)}/
//!   body.bin         # Response body
//!   entry.json       # EntryMeta
//! ```
//!
//! Writes go through temp-file + rename, so a reader sees either the old or
//! the new file. Two writers racing on one key: last write wins.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::PartitionSpec;
use crate::error::DeliveryResult;
use crate::types::{PriorityTier, Response};

mod evict;
pub(crate) mod io;
pub(crate) mod keys;
mod put;
mod read;

/// Metadata stored alongside an entry body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMeta {
    /// Normalized resource key.
    pub key: String,

    pub status: u16,

    #[serde(default)]
    pub headers: std::collections::BTreeMap<String, String>,

    /// When the entry was written. Absent means "fresh forever".
    #[serde(default)]
    pub stored_at: Option<DateTime<Utc>>,

    pub ttl_ms: u64,

    #[serde(default)]
    pub priority: PriorityTier,

    #[serde(default)]
    pub access_count: u64,

    pub last_accessed_at: DateTime<Utc>,

    pub size_bytes: u64,

    /// sha256 of the body, lowercase hex.
    pub body_digest: String,
}

/// One cached resource.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub response: Response,
    pub stored_at: Option<DateTime<Utc>>,
    pub ttl: Duration,
    pub priority: PriorityTier,
    pub access_count: u64,
    pub last_accessed_at: DateTime<Utc>,
    pub size_bytes: u64,
}

impl CacheEntry {
    /// A freshly fetched entry, stored now.
    pub fn new(key: impl Into<String>, response: Response, ttl: Duration) -> Self {
        let now = Utc::now();
        let size_bytes = response.body.len() as u64;
        Self {
            key: key.into(),
            response,
            stored_at: Some(now),
            ttl,
            priority: PriorityTier::Medium,
            access_count: 0,
            last_accessed_at: now,
            size_bytes,
        }
    }

    pub fn with_stored_at(mut self, stored_at: Option<DateTime<Utc>>) -> Self {
        self.stored_at = stored_at;
        self
    }

    pub fn with_priority(mut self, priority: PriorityTier) -> Self {
        self.priority = priority;
        self
    }

    /// `now - stored_at < ttl`. A missing timestamp counts as fresh.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        let Some(stored_at) = self.stored_at else {
            return true;
        };
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => now.signed_duration_since(stored_at) < ttl,
            Err(_) => true,
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Utc::now())
    }
}

/// Root of all partitions for one deployment.
#[derive(Debug, Clone)]
pub struct PartitionStore {
    root: PathBuf,
    version: String,
}

/// Handle on one `<family>-<version>` partition.
#[derive(Debug, Clone)]
pub struct Partition {
    name: String,
    dir: PathBuf,
    spec: PartitionSpec,
    /// Serializes metadata writes between clones of this handle.
    writes: Arc<Mutex<()>>,
}

impl PartitionStore {
    pub fn new(root: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            version: version.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Version new partitions are opened under.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Open (creating if needed) the current-version partition of `family`.
    pub async fn open(&self, family: &str, spec: PartitionSpec) -> DeliveryResult<Partition> {
        let name = keys::partition_name(family, &self.version);
        let dir = self.root.join(&name);
        io::ensure_dir(&dir).await?;
        Ok(Partition {
            name,
            dir,
            spec,
            writes: Arc::default(),
        })
    }

    /// Names of all partitions on disk, any version.
    pub async fn list_partitions(&self) -> DeliveryResult<Vec<String>> {
        read::list_partitions_impl(&self.root).await
    }

    /// Delete every partition not tagged with `current_version`.
    ///
    /// Returns the names of the removed partitions.
    pub async fn delete_unversioned(&self, current_version: &str) -> DeliveryResult<Vec<String>> {
        evict::delete_unversioned_impl(&self.root, current_version).await
    }

    /// Entry count and body bytes of every partition on disk, any version.
    pub async fn usage_report(&self) -> DeliveryResult<Vec<PartitionUsage>> {
        let mut report = Vec::new();
        for name in read::list_partitions_impl(&self.root).await? {
            let partition = Partition {
                dir: self.root.join(&name),
                name: name.clone(),
                spec: PartitionSpec {
                    ttl_secs: 0,
                    max_bytes: u64::MAX,
                    max_entries: usize::MAX,
                },
                writes: Arc::default(),
            };
            let (bytes, entries) = partition.usage().await?;
            report.push(PartitionUsage {
                current: keys::is_version(&name, &self.version),
                name,
                entries,
                bytes,
            });
        }
        Ok(report)
    }
}

/// One line of [`PartitionStore::usage_report`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionUsage {
    pub name: String,
    pub entries: usize,
    pub bytes: u64,
    /// Tagged with the store's current version.
    pub current: bool,
}

impl Partition {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn spec(&self) -> &PartitionSpec {
        &self.spec
    }

    /// Get an entry, fresh or stale, verifying body integrity.
    ///
    /// Records the access on the stored metadata. Returns `Err` on corrupt
    /// metadata or a digest mismatch; callers treat that as a miss.
    pub async fn get(&self, key: &str) -> DeliveryResult<Option<CacheEntry>> {
        read::get_impl(self, key).await
    }

    /// Write an entry, then trim the partition back within its budget.
    pub async fn put(&self, entry: &CacheEntry) -> DeliveryResult<()> {
        {
            let _guard = self.writes.lock().await;
            put::put_impl(self, entry).await?;
        }
        put::trim_impl(self).await
    }

    /// Returns whether an entry was removed.
    pub async fn delete(&self, key: &str) -> DeliveryResult<bool> {
        evict::delete_impl(self, key).await
    }

    pub async fn list_keys(&self) -> DeliveryResult<Vec<String>> {
        Ok(read::list_meta_impl(self)
            .await?
            .into_iter()
            .map(|meta| meta.key)
            .collect())
    }

    /// Total body bytes and entry count.
    pub async fn usage(&self) -> DeliveryResult<(u64, usize)> {
        let metas = read::list_meta_impl(self).await?;
        Ok((metas.iter().map(|m| m.size_bytes).sum(), metas.len()))
    }

    fn entry_dir(&self, key: &str) -> PathBuf {
        keys::entry_dir(&self.dir, key)
    }
}
