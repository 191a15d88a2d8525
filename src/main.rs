use anyhow::Result;
use logtail_hub::cli;

#[tokio::main]
async fn main() -> Result<()> {
    // Main entrypoint simply delegates control to the CLI layer, which
    // parses the subcommand and calls into the appropriate logic.
    cli::cli::run().await
}
