mod bitrate;
mod client;
mod command;
mod discovery;
mod error;
mod metrics;
mod poller;
mod system;
mod web;
use clap::Parser;
use command::{run, Options};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Parse command line arguments
    let options = Options::parse();

    run(options).await?;

    Ok(())
}
