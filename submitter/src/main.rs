mod catalog;
mod cli;
mod http_engine;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("submitter=debug,common=info")),
        )
        .init();

    cli::run().await
}
