//! Current-version partition handles, swapped atomically on activation.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::RwLock;
use tracing::info;

use crate::config::PartitionsConfig;
use crate::error::DeliveryResult;
use crate::store::{Partition, PartitionStore, PartitionUsage};
use crate::types::ResourceClass;

#[derive(Debug)]
struct Active {
    store: PartitionStore,
    open: HashMap<ResourceClass, Partition>,
}

#[derive(Debug)]
pub(crate) struct PartitionSet {
    specs: PartitionsConfig,
    active: RwLock<Active>,
}

impl PartitionSet {
    pub(crate) fn new(root: impl Into<PathBuf>, version: &str, specs: PartitionsConfig) -> Self {
        Self {
            specs,
            active: RwLock::new(Active {
                store: PartitionStore::new(root, version),
                open: HashMap::new(),
            }),
        }
    }

    pub(crate) async fn version(&self) -> String {
        self.active.read().await.store.version().to_string()
    }

    /// Current-version partition for `class`, opened on first use.
    pub(crate) async fn get(&self, class: ResourceClass) -> DeliveryResult<Partition> {
        if let Some(partition) = self.active.read().await.open.get(&class) {
            return Ok(partition.clone());
        }

        let mut active = self.active.write().await;
        if let Some(partition) = active.open.get(&class) {
            return Ok(partition.clone());
        }
        let partition = active
            .store
            .open(class.family(), self.specs.for_class(class).clone())
            .await?;
        active.open.insert(class, partition.clone());
        Ok(partition)
    }

    /// Switch to `version` and delete every partition not tagged with it.
    ///
    /// Handles are swapped before deletion, so no caller can open an old
    /// partition once this returns.
    pub(crate) async fn activate(&self, version: &str) -> DeliveryResult<Vec<String>> {
        let mut active = self.active.write().await;
        let root = active.store.root().to_path_buf();
        active.store = PartitionStore::new(root, version);
        active.open.clear();

        let removed = active.store.delete_unversioned(version).await?;
        info!(version, removed = removed.len(), "activated cache version");
        Ok(removed)
    }

    pub(crate) async fn usage_report(&self) -> DeliveryResult<Vec<PartitionUsage>> {
        self.active.read().await.store.usage_report().await
    }

    pub(crate) async fn list(&self) -> DeliveryResult<Vec<String>> {
        self.active.read().await.store.list_partitions().await
    }
}
