use vantage_core::{select, EnvironmentSignals, NetworkClass};

use crate::cli::args::PolicyArgs;
use crate::exit_codes;

pub fn run(args: PolicyArgs) -> anyhow::Result<i32> {
    let signals = match signals_from_args(&args) {
        Ok(signals) => signals,
        Err(e) => {
            eprintln!("error: {e}");
            return Ok(exit_codes::COMMAND_FAILED);
        }
    };
    let context = select(&signals);

    match args.format.as_str() {
        "yaml" => print!("{}", serde_yaml::to_string(&context)?),
        _ => println!("{}", serde_json::to_string_pretty(&context)?),
    }
    Ok(exit_codes::SUCCESS)
}

fn signals_from_args(args: &PolicyArgs) -> anyhow::Result<EnvironmentSignals> {
    let network: NetworkClass = args.network.parse()?;
    if let Some(level) = args.battery {
        anyhow::ensure!(
            (0.0..=1.0).contains(&level),
            "--battery must be a fraction between 0.0 and 1.0, got {level}"
        );
    }
    Ok(EnvironmentSignals {
        network,
        device_memory_gb: args.memory_gb,
        battery_level: args.battery,
        charging: args.charging,
        viewport_width: args.viewport,
        save_data: args.save_data,
    })
}
