use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "vantage",
    version,
    about = "Cache-aware resource delivery: partitioned cache, strategies and adaptive policy"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Args, Clone, Default)]
pub struct GlobalArgs {
    /// YAML config file (defaults to VANTAGE_* environment variables)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    #[arg(long, global = true)]
    pub cache_version: Option<String>,

    #[arg(long, global = true)]
    pub origin: Option<String>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Resolve a URL through the cache strategy engine
    Fetch(FetchArgs),
    /// Switch the active cache version and delete older partitions
    Activate(ActivateArgs),
    /// Show durable partitions and their usage
    Partitions(PartitionsArgs),
    /// Print the delivery policy derived from environment signals
    Policy(PolicyArgs),
    Version,
}

#[derive(Args, Clone)]
pub struct FetchArgs {
    pub url: String,

    /// Treat the request as a top-level navigation
    #[arg(long, conflicts_with = "prefetch")]
    pub navigate: bool,

    /// Treat the request as a speculative prefetch
    #[arg(long)]
    pub prefetch: bool,

    /// Write the response body to this file
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    #[arg(long, default_value = "text")]
    pub format: String,
}

#[derive(Args, Clone)]
pub struct ActivateArgs {
    pub version: String,
}

#[derive(Args, Clone)]
pub struct PartitionsArgs {
    #[arg(long, default_value = "text")]
    pub format: String,
}

#[derive(Args, Clone)]
pub struct PolicyArgs {
    /// slow, medium or fast (also accepts 2g, 3g, 4g)
    #[arg(long, default_value = "fast")]
    pub network: String,

    #[arg(long)]
    pub memory_gb: Option<f64>,

    /// Battery charge as a fraction (0.0-1.0)
    #[arg(long)]
    pub battery: Option<f64>,

    #[arg(long)]
    pub charging: bool,

    #[arg(long)]
    pub viewport: Option<u32>,

    #[arg(long)]
    pub save_data: bool,

    #[arg(long, default_value = "json")]
    pub format: String,
}
