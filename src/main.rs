use clap::Parser;
use watershed_join::cli::{run, Cli};
use watershed_join::error::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    run(cli).await
}
