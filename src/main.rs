//! notebook-ai CLI entry point.

use anyhow::Result;
use clap::Parser;
use notebook_ai::cli::{commands, Cli, Commands};
use notebook_ai::config::Settings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("notebook_ai={}", log_level)),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(Some(&std::path::PathBuf::from(path)))?,
        None => Settings::load()?,
    };

    std::fs::create_dir_all(settings.data_dir())?;

    match &cli.command {
        Commands::Chat {
            notebook_id,
            question,
            model,
            thread,
            stream,
            mode,
        } => {
            commands::run_chat(
                notebook_id,
                question,
                model.as_deref(),
                thread.as_deref(),
                *stream,
                mode.as_deref(),
                settings,
            )
            .await?;
        }

        Commands::Podcasts { action } => {
            commands::run_podcast(action, settings).await?;
        }

        Commands::Notebooks { all } => {
            commands::run_notebooks(*all, settings).await?;
        }

        Commands::Config { action } => {
            commands::run_config(action, cli.config.as_deref(), settings)?;
        }
    }

    Ok(())
}
