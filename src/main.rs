use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing::{info, warn};

use wormhole::config;
use wormhole::db;
use wormhole::discord::DiscordRest;
use wormhole::router::Event;
use wormhole::Wormhole;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Relay messages between linked channels; reads gateway events as JSON lines on stdin"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(args.config.as_path()))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let platform = Arc::new(DiscordRest::from_config(&cfg.discord)?);
    let app = Arc::new(Wormhole::new(pool, platform, &cfg.relay, &cfg.cache));

    info!("reading gateway events from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut handlers = JoinSet::new();
    let mut handled = 0u64;
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event: Event = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(err) => {
                warn!(?err, "skipping malformed event");
                continue;
            }
        };
        // Each event is handled as its own task, fan-out included.
        let app = app.clone();
        handlers.spawn(async move { app.router.dispatch(event).await });
        handled += 1;
        while handlers.try_join_next().is_some() {}
    }
    while handlers.join_next().await.is_some() {}

    info!(handled, "event stream closed");
    Ok(())
}
