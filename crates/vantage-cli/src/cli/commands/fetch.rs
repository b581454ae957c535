use anyhow::Context;
use tracing::debug;
use vantage_core::{DeliveryService, Disposition, ResourceRequest, ResponseSource};

use crate::cli::args::{FetchArgs, GlobalArgs};
use crate::exit_codes;

pub async fn run(global: &GlobalArgs, args: FetchArgs) -> anyhow::Result<i32> {
    let service = DeliveryService::new(super::load_config(global)?)?;

    let mut request = ResourceRequest::get(&args.url)?;
    if args.navigate {
        request = request.navigate();
    } else if args.prefetch {
        request = request.prefetch();
    }

    debug!(url = %request.url, mode = ?request.mode, "resolving");
    let disposition = service.engine().handle(&request).await;
    // Let a stale-while-revalidate refresh land before exiting.
    service.shutdown().await;

    let Disposition::Served(served) = disposition else {
        if args.format == "json" {
            println!("{}", serde_json::json!({ "url": args.url, "intercepted": false }));
        } else {
            println!("passthrough: {} is not intercepted", args.url);
        }
        return Ok(exit_codes::SUCCESS);
    };

    if let Some(path) = &args.output {
        std::fs::write(path, &served.response.body)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    if args.format == "json" {
        let out = serde_json::json!({
            "url": args.url,
            "intercepted": true,
            "class": served.class,
            "strategy": served.strategy,
            "source": served.source,
            "status": served.response.status,
            "bytes": served.response.body.len(),
            "headers": served.response.headers,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!(
            "{} {} via {} ({}, {} bytes, class {})",
            served.response.status,
            args.url,
            served.strategy,
            source_label(served.source),
            served.response.body.len(),
            served.class,
        );
    }

    if served.source == ResponseSource::Offline {
        return Ok(exit_codes::OFFLINE);
    }
    Ok(exit_codes::SUCCESS)
}

fn source_label(source: ResponseSource) -> &'static str {
    match source {
        ResponseSource::Cache => "cache",
        ResponseSource::Network => "network",
        ResponseSource::StaleCache => "stale cache",
        ResponseSource::Offline => "offline",
    }
}
