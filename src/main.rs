use anyhow::Result;
use bankroll::cli::{Cli, init_tracing};
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    cli.run().await
}
