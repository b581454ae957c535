use clap::Parser;
use tracing_subscriber::EnvFilter;
use vantage_core::DeliveryError;

mod cli;
pub mod exit_codes;

use cli::args::Cli;
use cli::commands::dispatch;

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("fatal: {e:?}");
            e.downcast_ref::<DeliveryError>()
                .map_or(exit_codes::INTERNAL_ERROR, DeliveryError::exit_code)
        }
    };
    std::process::exit(code);
}
