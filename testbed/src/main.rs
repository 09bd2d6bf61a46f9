//! `iptb` binary

use clap::Parser;

use testbed::commands::{self, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine.
    let _ = dotenv::dotenv();

    let cli = Cli::parse();
    shared::logging::init_tracing(Some(&cli.log_level));

    if let Err(e) = commands::execute(cli).await {
        shared::logging::log_error("iptb", &e);
        return Err(e.into());
    }
    Ok(())
}
