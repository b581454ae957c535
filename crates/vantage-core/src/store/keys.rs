//! Partition names and on-disk entry paths.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::types::ResourceClass;

pub(crate) fn partition_name(family: &str, version: &str) -> String {
    format!("{family}-{version}")
}

/// Whether a partition directory is `<family>-<version>` for a known family.
pub(crate) fn is_version(partition: &str, version: &str) -> bool {
    ResourceClass::ALL
        .iter()
        .any(|class| partition_name(class.family(), version) == partition)
}

/// Keys are URLs; hash them so any key maps to one safe file name.
pub(crate) fn key_digest(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

pub(crate) fn entry_dir(partition_dir: &Path, key: &str) -> PathBuf {
    partition_dir.join(key_digest(key))
}

pub(crate) fn body_digest(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}
