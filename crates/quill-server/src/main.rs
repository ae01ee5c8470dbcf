//! Quill tool server: record tools over MCP on stdin/stdout.
//!
//! stdout carries protocol frames only; all logging goes to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use quill_mcp::McpServer;
use quill_store::RecordStore;
use quill_tools::{EchoTool, SummarizeRecordsTool, ToolRegistry, record_tools};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "quill-server", version, about = "MCP tool server over a SQLite record store")]
struct Cli {
    /// SQLite database holding the records
    #[arg(long, env = "QUILL_STORE_PATH", default_value = "notes.db")]
    db: PathBuf,

    /// Server name reported during the handshake
    #[arg(long, default_value = "quill-server")]
    name: String,

    /// Enable verbose/debug logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let store = RecordStore::open(&cli.db)
        .await
        .with_context(|| format!("Failed to open record store {}", cli.db.display()))?;
    tracing::info!("Record store at {}", store.path().display());
    let store = Arc::new(store);

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(EchoTool::new(cli.name.clone())))?;
    for tool in record_tools(Arc::clone(&store)) {
        registry.register(tool)?;
    }
    registry.register(Arc::new(SummarizeRecordsTool::new(store)))?;

    let server = McpServer::new(cli.name, Arc::new(registry)).with_instructions(
        "Records are short text notes with integer ids. \
         Use list_records to see everything before updating or deleting.",
    );
    server.serve_stdio().await?;
    Ok(())
}
