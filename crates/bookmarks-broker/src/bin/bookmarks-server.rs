//! The broker process: HTTP + SSE listener binding C4/C5 together.

use std::path::PathBuf;
use std::sync::Arc;

use bookmarks_broker::{router, AppState, Applicator, Broker};
use bookmarks_core::{OperationLog, RedbOperationLog, SseConfig};
use clap::Parser;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "bookmarks-server", about = "Real-time coordination core broker")]
struct Args {
    /// Address to bind the HTTP listener on.
    #[arg(long, default_value = "127.0.0.1:8787")]
    listen: String,

    /// Path to the redb-backed operation log.
    #[arg(long, default_value = "bookmarks-broker.redb")]
    log_path: PathBuf,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    bookmarks_logging::init(bookmarks_logging::LogConfig {
        level: args.log_level.clone(),
        ..Default::default()
    });

    let log: Arc<dyn OperationLog> = Arc::new(RedbOperationLog::open(&args.log_path)?);
    let broker = Arc::new(Broker::new(SseConfig::default()));
    let applicator = Arc::new(Applicator::new(broker.clone(), log));
    let state = AppState { broker, applicator };

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!(addr = %args.listen, log_path = %args.log_path.display(), "bookmarks-server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
