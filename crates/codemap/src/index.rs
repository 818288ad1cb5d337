//! The full indexing pipeline: scan → upsert → prune → enrich → upsert.
//!
//! One run is one lifecycle epoch: it begins by entering `in_progress`
//! (rejecting overlap) and latches `ready` or `failed` on the way out. The
//! watcher's single-file path lives in [`crate::watcher`]; both paths are
//! safe to interleave because every store write is atomic.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::lifecycle::IndexLifecycle;
use crate::lsp::LspService;
use crate::scanner::Scanner;
use crate::store::{GraphStore, NodeResolver};
use crate::{IndexError, Node, Result};

/// Outcome of one full index run.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub nodes: usize,
    pub edges: usize,
    #[serde(skip)]
    pub duration: Duration,
}

#[derive(Clone)]
pub struct Indexer {
    scanner: Arc<Scanner>,
    store: GraphStore,
    lsp: Arc<LspService>,
    lifecycle: Arc<IndexLifecycle>,
    root: PathBuf,
}

impl Indexer {
    pub fn new(
        scanner: Arc<Scanner>,
        store: GraphStore,
        lsp: Arc<LspService>,
        lifecycle: Arc<IndexLifecycle>,
        root: PathBuf,
    ) -> Self {
        Self {
            scanner,
            store,
            lsp,
            lifecycle,
            root,
        }
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn lifecycle(&self) -> &Arc<IndexLifecycle> {
        &self.lifecycle
    }

    /// Run a full scan/prune/enrich cycle.
    ///
    /// `force` clears the existing graph before scanning. Rejects when a
    /// cycle is already in progress.
    pub async fn run_full(&self, cancel: &CancellationToken, force: bool) -> Result<IndexStats> {
        self.lifecycle.begin()?;
        let started = Instant::now();

        let result = self.run_inner(cancel, force).await;
        match &result {
            Ok(_) => self.lifecycle.finish(Ok(())),
            Err(e) => self.lifecycle.finish(Err(e.to_string())),
        }

        result.map(|(nodes, edges)| IndexStats {
            nodes,
            edges,
            duration: started.elapsed(),
        })
    }

    async fn run_inner(&self, cancel: &CancellationToken, force: bool) -> Result<(usize, usize)> {
        if force {
            self.store.clear(cancel)?;
        }

        let scanner = self.scanner.clone();
        let root = self.root.clone();
        let nodes: Vec<Node> = tokio::task::spawn_blocking(move || scanner.scan(&root))
            .await
            .map_err(|e| IndexError::Join(e.to_string()))??;

        let mut seen = std::collections::HashSet::new();
        let mut seen_files = Vec::new();
        for node in &nodes {
            if seen.insert(node.file_path.as_str()) {
                seen_files.push(node.file_path.clone());
            }
        }

        self.store.bulk_upsert_nodes(cancel, &nodes)?;

        // A failed prune leaves the graph diverged from disk; store-write
        // errors fail the run.
        self.store.prune_stale_files(cancel, &seen_files)?;

        let resolver: Arc<dyn NodeResolver> = Arc::new(self.store.clone());
        let edges = self.lsp.enrich(cancel, &nodes, resolver).await?;

        self.store.bulk_upsert_edges(cancel, &edges)?;

        tracing::info!(
            "Index complete: {} nodes, {} edges",
            nodes.len(),
            edges.len()
        );
        Ok((nodes.len(), edges.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    fn indexer_for(root: &std::path::Path) -> Indexer {
        Indexer::new(
            Arc::new(Scanner::new().unwrap()),
            GraphStore::new(Db::in_memory().unwrap()),
            Arc::new(LspService::new()),
            Arc::new(IndexLifecycle::new()),
            root.to_path_buf(),
        )
    }

    #[tokio::test]
    async fn test_run_full_rejects_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let indexer = indexer_for(dir.path());
        indexer.lifecycle.begin().unwrap();

        let cancel = CancellationToken::new();
        let err = indexer.run_full(&cancel, false).await.unwrap_err();
        assert!(matches!(err, IndexError::IndexInProgress));
    }

    #[tokio::test]
    async fn test_run_full_empty_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let indexer = indexer_for(dir.path());

        let cancel = CancellationToken::new();
        let stats = indexer.run_full(&cancel, false).await.unwrap();
        assert_eq!(stats.nodes, 0);
        assert_eq!(stats.edges, 0);
        assert_eq!(indexer.lifecycle.status().0, crate::IndexStatus::Ready);
    }

    #[tokio::test]
    async fn test_failed_run_latches_failed_status() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.go"), "package main\nfunc F() {}\n").unwrap();

        // Point the go server at a nonexistent binary to force the
        // missing-server configuration error.
        let config = crate::config::LspConfig {
            go_path: Some("/definitely/not/gopls".to_string()),
            ..Default::default()
        };
        let indexer = Indexer::new(
            Arc::new(Scanner::new().unwrap()),
            GraphStore::new(Db::in_memory().unwrap()),
            Arc::new(LspService::with_config(config)),
            Arc::new(IndexLifecycle::new()),
            dir.path().to_path_buf(),
        );

        let cancel = CancellationToken::new();
        let err = indexer.run_full(&cancel, false).await.unwrap_err();
        assert!(matches!(err, IndexError::MissingLanguageServers(_)));

        let (status, error, _) = indexer.lifecycle.status();
        assert_eq!(status, crate::IndexStatus::Failed);
        assert!(error.unwrap().contains("Language server(s) not found"));
    }
}
