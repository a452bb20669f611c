use anyhow::Result;
use clap::Parser;
use geostore::cli::{run, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt::init();
    tracing::info!("startup: tracing initialised, environment loaded");

    let cli = Cli::parse();
    let result = run(cli).await;
    match &result {
        Ok(_) => tracing::info!("done"),
        Err(e) => tracing::error!(error = %e, "exited with error"),
    }
    result
}
