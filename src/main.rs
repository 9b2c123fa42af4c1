//! nolauncher CLI binary entry point.

use clap::Parser;
use nolauncher::cli::logging::{init_tracing, DEFAULT_FILTER};
use nolauncher::cli::{handlers, Cli, Commands};
use nolauncher::config::LauncherConfig;
use nolauncher::gateway::CommandGateway;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(DEFAULT_FILTER, cli.log_json);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = LauncherConfig::from_env()?;
    if let Some(dir) = cli.data_dir {
        config = config.with_data_dir(dir);
    }
    if let Some(client_id) = cli.client_id {
        config = config.with_client_id(client_id);
    }

    let gateway = CommandGateway::from_config(&config)?;
    match cli.command {
        Commands::Auth(args) => handlers::handle_auth(&gateway, args.command).await,
        Commands::Users(args) => handlers::handle_users(&gateway, args.command),
        Commands::Instance(args) => handlers::handle_instance(&gateway, args.command).await,
    }
}
