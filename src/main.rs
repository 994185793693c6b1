mod cli;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "code_atlas=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let config_path = cli.config_path()?;

    match cli.command {
        Commands::Register { path } => {
            cli::register(&config_path, &path)?;
        }
        Commands::Unregister { path } => {
            cli::unregister(&config_path, &path)?;
        }
        Commands::Build { path } => {
            cli::build(&config_path, &path).await?;
        }
        Commands::Daemon => {
            cli::daemon(&config_path).await?;
        }
        Commands::Search {
            query,
            repo,
            limit,
            regex,
            format,
        } => {
            cli::search(&config_path, &repo, &query, regex, limit, &format).await?;
        }
        Commands::WhereUsed {
            symbol,
            repo,
            limit,
            format,
        } => {
            cli::where_used(&config_path, &repo, &symbol, limit, &format)?;
        }
        Commands::Lineage {
            symbol,
            repo,
            direction,
            limit,
            format,
        } => {
            cli::lineage(&config_path, &repo, &symbol, &direction, limit, &format)?;
        }
        Commands::Status { repo, format } => {
            cli::status(&config_path, &repo, &format)?;
        }
        Commands::Doctor { repo, format } => {
            cli::doctor(&config_path, &repo, &format)?;
        }
    }

    Ok(())
}
