//! codemap: an always-fresh code graph served over MCP.
//!
//! Startup wires the pieces together: sqlite store under
//! `<git-root-or-cwd>/.ctxhub/`, tree-sitter scanner, LSP service, index
//! lifecycle. The initial full index and the file watcher run in the
//! background while the MCP server answers on stdio.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use codemap::{
    Config, Db, FileWatcher, GraphStore, IndexLifecycle, Indexer, LspService, Scanner,
};

mod mcp;
mod updater;

/// Always-fresh code graph for AI agents, served over MCP
#[derive(Parser)]
#[command(name = "codemap", version, about, long_about = None)]
struct Args {
    /// Project directory to index (default: current working directory)
    #[arg(long, value_name = "PATH")]
    project_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // stdout carries MCP frames; all diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Some(dir) = &args.project_dir {
        let abs = std::fs::canonicalize(dir)
            .with_context(|| format!("failed to resolve project directory {}", dir.display()))?;
        anyhow::ensure!(abs.is_dir(), "project directory is not a directory: {}", abs.display());
        std::env::set_current_dir(&abs)
            .with_context(|| format!("failed to change to project directory {}", abs.display()))?;
    }

    let cwd = std::env::current_dir().context("failed to get working directory")?;
    let project_root = codemap::uri::find_git_root(&cwd).unwrap_or_else(|| cwd.clone());
    let db_path = project_root.join(".ctxhub").join("codemap.sqlite");

    let config = Config::load(&project_root);

    let db = Db::open(&db_path)
        .with_context(|| format!("failed to init database at {}", db_path.display()))?;
    let store = GraphStore::new(db);

    let scanner = Arc::new(Scanner::with_config(&config).context("failed to init scanner")?);
    let lsp = Arc::new(LspService::with_config(config.lsp.clone()));
    let lifecycle = Arc::new(IndexLifecycle::new());
    let indexer = Indexer::new(
        scanner.clone(),
        store.clone(),
        lsp.clone(),
        lifecycle.clone(),
        cwd.clone(),
    );

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    updater::check_for_updates_in_background();

    // Initial index runs concurrently with server startup; tools gate on the
    // readiness latch. A configuration failure (missing language server)
    // latches `failed` and stays visible through index_status.
    {
        let indexer = indexer.clone();
        let cancel = cancel.clone();
        let cwd = cwd.clone();
        tokio::spawn(async move {
            tracing::info!("Indexing workspace: {}", cwd.display());
            match indexer.run_full(&cancel, false).await {
                Ok(stats) => tracing::info!(
                    "Initial index complete: {} nodes, {} edges",
                    stats.nodes,
                    stats.edges
                ),
                Err(e) => tracing::error!("Initial index failed: {e}"),
            }
        });
    }

    // File watcher runs from startup, in parallel with the initial index.
    {
        let watcher = FileWatcher::new(scanner, store.clone(), lsp.clone(), &cwd, &config);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = watcher.watch(cancel).await {
                tracing::error!("Watcher error: {e}");
            }
        });
    }

    let state = Arc::new(mcp::AppState {
        indexer,
        store,
        lifecycle,
        root: cwd,
        cancel: cancel.clone(),
    });

    let result = mcp::run_server(state, cancel.clone()).await;

    tracing::info!("Shutting down gracefully...");
    cancel.cancel();
    lsp.shutdown().await;

    result
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    tracing::warn!("Failed to register SIGTERM handler: {e}");
                    let _ = tokio::signal::ctrl_c().await;
                    cancel.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        tracing::info!("Received shutdown signal, cleaning up...");
        cancel.cancel();
    });
}
