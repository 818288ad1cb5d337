//! codemap: an always-fresh semantic graph of a source workspace.
//!
//! The crate provides the indexing core behind the `codemap` MCP server:
//! - Symbol extraction from source files (Go, Python, JavaScript,
//!   TypeScript, Lua) using tree-sitter grammar queries
//! - A sqlite-backed graph store with a transitive impact query
//! - LSP-driven enrichment that turns bare symbol nodes into edges
//! - A debounced file watcher for incremental re-indexing
//! - An index lifecycle with a re-armable readiness latch

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod config;
pub mod db;
pub mod index;
pub mod lifecycle;
pub mod lsp;
pub mod scanner;
pub mod store;
pub mod uri;
pub mod watcher;

// Re-export main types
pub use config::Config;
pub use db::Db;
pub use index::{IndexStats, Indexer};
pub use lifecycle::{IndexLifecycle, IndexStatus};
pub use lsp::LspService;
pub use scanner::Scanner;
pub use store::{GraphStore, NodeResolver};
pub use watcher::FileWatcher;

/// A symbol definition extracted from source code.
///
/// Positions are 1-based and inclusive, and describe the *name token* of the
/// definition, not the enclosing body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Deterministic fingerprint of `(file_path, name)`, stable across runs
    pub id: String,
    /// Source-level identifier text
    pub name: String,
    /// Grammar-derived category, e.g. `function_declaration`
    pub kind: String,
    /// Absolute path on disk
    pub file_path: String,
    pub line_start: u32,
    pub line_end: u32,
    pub col_start: u32,
    pub col_end: u32,
    /// `file://` URI of the containing file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol_uri: Option<String>,
    /// Wall-clock timestamp of the last upsert
    pub created_at: DateTime<Utc>,
}

/// A directed relation between two symbols.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub source_id: String,
    pub target_id: String,
    pub relation: Relation,
    /// Wall-clock timestamp of the upsert that created the edge
    pub created_at: DateTime<Utc>,
}

/// The label on an edge. `References` points caller → callee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    References,
    Implements,
    Calls,
    Imports,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::References => "references",
            Relation::Implements => "implements",
            Relation::Calls => "calls",
            Relation::Imports => "imports",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "references" => Some(Relation::References),
            "implements" => Some(Relation::Implements),
            "calls" => Some(Relation::Calls),
            "imports" => Some(Relation::Imports),
            _ => None,
        }
    }
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while building or querying the graph.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("unsupported file extension: {}", path.display())]
    UnsupportedFile { path: PathBuf },

    #[error("failed to parse file: {}", path.display())]
    Parse { path: PathBuf },

    #[error("failed to compile grammar query for {language}: {message}")]
    Query { language: String, message: String },

    #[error("{0}")]
    MissingLanguageServers(String),

    #[error("failed to start language server for {lang}: {message}")]
    ServerStart { lang: String, message: String },

    #[error("failed to start any language servers")]
    NoServersStarted,

    #[error("LSP request timed out after {0:?}")]
    RpcTimeout(Duration),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("language server protocol violation: {0}")]
    Protocol(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("indexing already in progress")]
    IndexInProgress,

    #[error("indexing failed: {0}")]
    IndexFailed(String),

    #[error("background task failed: {0}")]
    Join(String),
}

pub type Result<T> = std::result::Result<T, IndexError>;
