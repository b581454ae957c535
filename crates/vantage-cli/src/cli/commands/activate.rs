use vantage_core::DeliveryService;

use crate::cli::args::{ActivateArgs, GlobalArgs};
use crate::exit_codes;

pub async fn run(global: &GlobalArgs, args: ActivateArgs) -> anyhow::Result<i32> {
    let config = super::load_config(global)?.with_cache_version(&args.version);
    let service = DeliveryService::new(config)?;

    let report = service.start().await?;
    service.shutdown().await;

    println!("active version: {}", report.version);
    if report.removed_partitions.is_empty() {
        println!("no stale partitions");
    }
    for name in &report.removed_partitions {
        println!("removed {name}");
    }
    Ok(exit_codes::SUCCESS)
}
