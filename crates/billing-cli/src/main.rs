//! `billing` entry point.

use std::process::ExitCode;

use billing_cli::{Cli, Command, Config, LogFormat, commands, seed, store};
use clap::Parser;
use ledger_store::InMemoryLedgerStore;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let json = config.log_format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}

async fn run(cli: Cli, config: &Config) -> anyhow::Result<serde_json::Value> {
    if cli.memory {
        let store = InMemoryLedgerStore::new();
        // The seed subcommand itself reports on an empty store
        if !matches!(cli.command, Command::Seed) {
            seed::seed(&store).await?;
        }
        return commands::execute(&store, cli.command, config).await;
    }

    let store = store::connect(config).await?;
    commands::execute(&store, cli.command, config).await
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = Config::from_env();
    init_tracing(&config);

    match run(cli, &config).await {
        Ok(output) => {
            println!("{output:#}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            let outcome = billing_cli::outcome(&err);
            tracing::error!(error = %err, ?outcome, "command failed");
            eprintln!("error: {err:#}");
            outcome.into()
        }
    }
}
