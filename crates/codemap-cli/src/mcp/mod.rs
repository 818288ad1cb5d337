//! MCP surface: tools and prompts over the codemap index.


pub mod prompts;
pub mod server;
pub mod tools;

use std::path::PathBuf;
use std::sync::Arc;

use codemap::{GraphStore, IndexLifecycle, Indexer};
use tokio_util::sync::CancellationToken;

pub use server::run_server;

/// Shared state behind every tool handler.
pub struct AppState {
    pub indexer: Indexer,
    pub store: GraphStore,
    pub lifecycle: Arc<IndexLifecycle>,
    pub root: PathBuf,
    /// Root shutdown token; tool-level deadlines wrap it.
    pub cancel: CancellationToken,
}
