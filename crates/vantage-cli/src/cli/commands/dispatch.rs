use super::super::args::*;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let global = cli.global;
    match cli.cmd {
        Command::Fetch(args) => super::fetch::run(&global, args).await,
        Command::Activate(args) => super::activate::run(&global, args).await,
        Command::Partitions(args) => super::partitions::run(&global, args).await,
        Command::Policy(args) => super::policy::run(args),
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(crate::exit_codes::SUCCESS)
        }
    }
}
