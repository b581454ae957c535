use super::args::*;

pub mod activate;
pub mod fetch;
pub mod partitions;
pub mod policy;

mod dispatch;
pub use dispatch::dispatch;

use vantage_core::DeliveryConfig;

/// Config from `--config` or the environment, then flag overrides.
pub(crate) fn load_config(global: &GlobalArgs) -> anyhow::Result<DeliveryConfig> {
    let mut config = match &global.config {
        Some(path) => DeliveryConfig::from_yaml_file(path)?,
        None => DeliveryConfig::from_env(),
    };
    if let Some(dir) = &global.cache_dir {
        config = config.with_cache_dir(dir);
    }
    if let Some(version) = &global.cache_version {
        config = config.with_cache_version(version);
    }
    if let Some(origin) = &global.origin {
        config = config.with_origin(origin);
    }
    Ok(config)
}
