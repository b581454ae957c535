use vantage_core::DeliveryService;

use crate::cli::args::{GlobalArgs, PartitionsArgs};
use crate::exit_codes;

/// Read-only: the service is not started, so nothing is activated or deleted.
pub async fn run(global: &GlobalArgs, args: PartitionsArgs) -> anyhow::Result<i32> {
    let service = DeliveryService::new(super::load_config(global)?)?;
    let report = service.engine().usage_report().await?;

    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(exit_codes::SUCCESS);
    }

    println!("cache dir: {}", service.config().cache_dir.display());
    println!("version:   {}", service.engine().version().await);
    if report.is_empty() {
        println!("(no partitions)");
    }
    for usage in &report {
        let marker = if usage.current { "*" } else { " " };
        println!(
            "{marker} {:<20} {:>6} entries {:>12} bytes",
            usage.name, usage.entries, usage.bytes
        );
    }
    Ok(exit_codes::SUCCESS)
}
