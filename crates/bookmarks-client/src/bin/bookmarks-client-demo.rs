//! Manual smoke test for the coordinator: connects to a running
//! `bookmarks-server`, creates a folder and a bookmark, and prints every
//! outbound port message it sees until interrupted.

use std::sync::Arc;

use bookmarks_client::{ClientConfig, InboundMessage, SharedCoordinator};
use bookmarks_core::{InMemoryOperationLog, Namespace, NodeId, OperationLog};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "bookmarks-client-demo", about = "Manual smoke test for the shared coordinator")]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:8787")]
    broker_url: String,

    #[arg(long, default_value = "default")]
    namespace: String,

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

    let log: Arc<dyn OperationLog> = Arc::new(InMemoryOperationLog::new());
    let coordinator = SharedCoordinator::new(ClientConfig::new(args.broker_url), log);
    let namespace = Namespace::from(args.namespace);

    let (port_id, mut outbound) = coordinator.register_port();
    tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            println!("{}", serde_json::to_string(&message).unwrap_or_default());
        }
    });

    coordinator
        .handle_message(port_id.clone(), InboundMessage::Connect { namespace: namespace.clone(), request_id: None })
        .await;

    let folder_id = NodeId::generate();
    coordinator
        .handle_message(
            port_id.clone(),
            InboundMessage::EnqueueOperation {
                namespace: namespace.clone(),
                op: bookmarks_core::Op::CreateFolder {
                    id: Some(folder_id.clone()),
                    parent_id: Some(NodeId::root()),
                    title: "Demo".to_string(),
                    is_open: Some(true),
                    placement: None,
                },
                request_id: None,
            },
        )
        .await;

    coordinator
        .handle_message(
            port_id.clone(),
            InboundMessage::EnqueueOperation {
                namespace: namespace.clone(),
                op: bookmarks_core::Op::CreateBookmark {
                    id: Some(NodeId::generate()),
                    parent_id: Some(folder_id),
                    title: "Rust".to_string(),
                    url: "https://www.rust-lang.org".to_string(),
                    placement: None,
                },
                request_id: None,
            },
        )
        .await;

    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
    coordinator
        .handle_message(port_id, InboundMessage::GetStatus { namespace: Some(namespace), request_id: Some("final".to_string()) })
        .await;
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    Ok(())
}
