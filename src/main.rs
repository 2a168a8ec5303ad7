use anyhow::Result;
use tracing::{info, error};

mod activity;
mod app;
mod assistant;
mod browser;
mod cli;
mod commands;
mod error;
mod persistence;
mod proxy;
mod scrape;
mod store;
mod tasks;
mod utils;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = cli::parse_args();

    // Initialize logging
    utils::init_logging(args.verbose, args.log_file.clone())?;

    info!("Starting Beryl Lens v{}", env!("CARGO_PKG_VERSION"));

    // Process commands
    match cli::process_command(args).await {
        Ok(_) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            Err(e)
        }
    }
}
