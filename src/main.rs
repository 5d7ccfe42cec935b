mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use preinstall_diagnostics::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format)?;

    match cli.command {
        Commands::Version => commands::version::run(),
        Commands::Run(args) => commands::run::run(args).await,
        Commands::Clean => commands::clean::run().await,
        Commands::Template(args) => commands::template::run(args).await,
        Commands::Node(args) => commands::node::run(args).await,
    }
}
