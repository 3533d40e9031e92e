pub mod commands;
pub mod db;
pub mod engine;
pub mod error;
pub mod grid;
pub mod reporter;
pub mod settings;
pub mod store;
pub mod tracker;
mod utils;

pub use error::{Result, TrackError};
pub use tracker::WatchTracker;

use anyhow::Context;
use log::info;
use settings::SettingsStore;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Serves JSON-lines requests from stdin, one response line per request.
pub fn run() -> anyhow::Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    info!("watchtrail starting up...");

    let settings = SettingsStore::from_env()?.current();
    let tracker = WatchTracker::open(&settings)?;

    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    runtime.block_on(serve(tracker))
}

async fn serve(tracker: WatchTracker) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await.context("failed to read request")? {
        if line.trim().is_empty() {
            continue;
        }
        let mut response = commands::handle_line(&tracker, &line).await;
        response.push('\n');
        stdout
            .write_all(response.as_bytes())
            .await
            .context("failed to write response")?;
        stdout.flush().await?;
    }

    info!("Input closed; shutting down");
    Ok(())
}
