// ABOUTME: Binary entry point for the labgraph maintenance CLI
// ABOUTME: Parses arguments, loads configuration and dispatches the command

use anyhow::Result;
use labgraph::cli::{App, Args};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();
    let mut app = App::from_args(&args)?;

    app.run(args).await?;

    Ok(())
}
