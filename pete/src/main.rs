use clap::Parser;
use pete::{Cli, init_logging, run_session};
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::info;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging();

    let turns = Arc::new(cli.build_controller()?);
    if !cli.no_prewarm {
        turns.prewarm().await;
    }
    info!("ready: type a question and press enter");

    let summary = run_session(turns, BufReader::new(tokio::io::stdin())).await?;
    info!(
        completed = summary.completed,
        interrupted = summary.interrupted,
        failed = summary.failed,
        "session over"
    );
    Ok(())
}
