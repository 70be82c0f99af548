use clap::Parser;
use tracing_subscriber::EnvFilter;

use compass_account::cli::{self, Cli, Commands};
use compass_account::config::CompassConfig;

fn main() {
    let cli = Cli::parse();
    let config = CompassConfig::load_or_default(&cli.config);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.storage.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Keys { cmd } => cli::keys::handle_keys_command(cmd),
        Commands::Inspect { cmd } => cli::inspect::handle_inspect_command(cmd),
        Commands::Account { cmd } => cli::account::handle_account_command(cmd, &config),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
