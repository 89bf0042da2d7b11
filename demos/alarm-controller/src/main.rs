use std::path::PathBuf;

use clap::Parser;

use tokio_util::sync::CancellationToken;

use tracing::{Level, error, info};

use wotkit_controller::config::OrchestratorConfig;
use wotkit_controller::failure::Target;
use wotkit_controller::orchestrator::Orchestrator;

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error("Unable to read `{path}`: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error(transparent)]
    Controller(#[from] wotkit_controller::error::Error),
}

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// JSON configuration file.
    config: PathBuf,

    /// Overrides the replacement candidates of the configuration,
    /// written as `host:port`.
    #[arg(long = "candidate")]
    candidates: Vec<String>,

    /// Logs every probe and poll.
    #[arg(short, long)]
    verbose: bool,
}

async fn run(cli: Cli) -> Result<(), Error> {
    let json = tokio::fs::read_to_string(&cli.config)
        .await
        .map_err(|source| Error::Read {
            path: cli.config.display().to_string(),
            source,
        })?;

    let mut config = OrchestratorConfig::from_json(&json)?;
    if !cli.candidates.is_empty() {
        let candidates = cli
            .candidates
            .iter()
            .map(|candidate| candidate.parse::<Target>())
            .collect::<Result<Vec<_>, _>>()?;
        config = config.candidates(candidates);
    }

    let mut orchestrator = Orchestrator::new(config)?;
    let cancellation_token = CancellationToken::new();

    let shutdown = cancellation_token.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for Ctrl-C: {e}");
        }
        info!("Shutting down");
        shutdown.cancel();
    });

    orchestrator.run(cancellation_token).await;
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .init();

    if let Err(e) = run(cli).await {
        error!("{e}");
        std::process::exit(1);
    }
}
