mod cli;
mod error;
mod logging;

use std::process;

use clap::Parser;
use hls_mirror_engine::{MirrorConfig, MirrorService};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cli::Args;
use crate::error::{AppError, Result};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = logging::init_logging(args.verbose, args.log_format) {
        eprintln!("Error: {e}");
        process::exit(1);
    }

    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = MirrorConfig::load(&args.config)
        .map_err(|e| AppError::Config(format!("{}: {e}", args.config.display())))?;
    info!(config = %args.config.display(), "Configuration loaded");

    let token = CancellationToken::new();
    let service = MirrorService::from_config(&config, token.clone())?;

    let signal_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                signal_token.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    service.run().await;
    Ok(())
}
