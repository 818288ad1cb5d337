//! File system watcher for incremental index updates.
//!
//! Events are coalesced per file through a debounce map: a write or create
//! arms a deadline 500 ms out (repeated events push it back), and a 100 ms
//! ticker flushes expired entries into the single-file reindex path. Removes
//! and renames delete immediately, with no debounce.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use ignore::gitignore::Gitignore;
use notify::event::ModifyKind;
use notify::{EventKind, RecursiveMode, Watcher};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::lsp::LspService;
use crate::scanner::{is_supported_file, Scanner};
use crate::store::{GraphStore, NodeResolver};
use crate::Result;

const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Per-file debounce state: *quiet* → *pending(deadline)* → *quiet*.
pub struct DebounceMap {
    pending: HashMap<PathBuf, Instant>,
    window: Duration,
}

impl DebounceMap {
    pub fn new(window: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            window,
        }
    }

    /// Arm (or re-arm) the deadline for a path. Repeated events before
    /// expiry coalesce into one flush.
    pub fn record(&mut self, path: PathBuf, now: Instant) {
        self.pending.insert(path, now + self.window);
    }

    /// Remove and return every entry whose deadline has passed.
    pub fn take_ready(&mut self, now: Instant) -> Vec<PathBuf> {
        let ready: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, deadline)| now > **deadline)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &ready {
            self.pending.remove(path);
        }
        ready
    }

    /// Drop a path without reindexing (file deleted while pending).
    pub fn remove(&mut self, path: &Path) {
        self.pending.remove(path);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Watches a workspace root and keeps the graph current.
pub struct FileWatcher {
    scanner: Arc<Scanner>,
    store: GraphStore,
    lsp: Arc<LspService>,
    root: PathBuf,
    gitignore: Option<Gitignore>,
    exclude_dirs: Vec<String>,
    pending: StdMutex<DebounceMap>,
}

impl FileWatcher {
    pub fn new(
        scanner: Arc<Scanner>,
        store: GraphStore,
        lsp: Arc<LspService>,
        root: &Path,
        config: &Config,
    ) -> Self {
        let root = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        let gitignore = if config.respect_gitignore {
            let (matcher, err) = Gitignore::new(root.join(".gitignore"));
            if let Some(err) = err {
                tracing::warn!("gitignore parse error: {}", err);
            }
            Some(matcher)
        } else {
            None
        };

        Self {
            scanner,
            store,
            lsp,
            root,
            gitignore,
            exclude_dirs: config.excluded_dirs(),
            pending: StdMutex::new(DebounceMap::new(Duration::from_millis(config.debounce_ms))),
        }
    }

    /// Watch the root until the token is cancelled.
    pub async fn watch(&self, cancel: CancellationToken) -> Result<()> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })
        .map_err(to_io)?;
        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(to_io)?;

        tracing::info!("Watching {} for file changes...", self.root.display());

        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                event = rx.recv() => {
                    match event {
                        Some(Ok(event)) => self.handle_event(&cancel, event).await,
                        Some(Err(e)) => tracing::warn!("Watcher error: {}", e),
                        None => return Ok(()),
                    }
                }
                _ = ticker.tick() => self.flush_pending(&cancel).await,
            }
        }
    }

    async fn handle_event(&self, cancel: &CancellationToken, event: notify::Event) {
        for path in &event.paths {
            if self.is_ignored(path) || !is_supported_file(path) {
                continue;
            }

            match event.kind {
                EventKind::Create(_)
                | EventKind::Modify(ModifyKind::Data(_))
                | EventKind::Modify(ModifyKind::Any)
                | EventKind::Any => {
                    tracing::debug!("File changed: {}", path.display());
                    self.lock_pending().record(path.clone(), Instant::now());
                }
                // Renames surface old and new names alike; a vanished path
                // is a delete, a present one re-enters the debounce map.
                EventKind::Modify(ModifyKind::Name(_)) => {
                    if path.exists() {
                        self.lock_pending().record(path.clone(), Instant::now());
                    } else {
                        self.handle_file_deleted(cancel, path).await;
                    }
                }
                EventKind::Remove(_) => {
                    self.handle_file_deleted(cancel, path).await;
                }
                _ => {}
            }
        }
    }

    async fn flush_pending(&self, cancel: &CancellationToken) {
        let ready = self.lock_pending().take_ready(Instant::now());
        for path in ready {
            if let Err(e) = self.reindex_file(cancel, &path).await {
                tracing::warn!("Failed to reindex {}: {}", path.display(), e);
            }
        }
    }

    /// Re-index one file: stale rows out, fresh nodes in, then an
    /// enrichment pass over just this file's nodes.
    pub async fn reindex_file(&self, cancel: &CancellationToken, path: &Path) -> Result<()> {
        if !path.exists() {
            self.handle_file_deleted(cancel, path).await;
            return Ok(());
        }

        tracing::info!("Re-indexing: {}", path.display());

        let nodes = self.scanner.scan_file(path)?;
        // Match the canonical path form the scanner stores.
        let file_path = std::fs::canonicalize(path)
            .unwrap_or_else(|_| path.to_path_buf())
            .to_string_lossy()
            .to_string();

        self.store.delete_nodes_by_file(cancel, &file_path)?;
        self.store.bulk_upsert_nodes(cancel, &nodes)?;

        let resolver: Arc<dyn NodeResolver> = Arc::new(self.store.clone());
        match self.lsp.enrich(cancel, &nodes, resolver).await {
            Ok(edges) => {
                if let Err(e) = self.store.bulk_upsert_edges(cancel, &edges) {
                    tracing::warn!("Failed to store edges: {}", e);
                }
                tracing::info!(
                    "Re-indexed {}: {} nodes, {} edges",
                    path.display(),
                    nodes.len(),
                    edges.len()
                );
            }
            Err(e) => {
                tracing::warn!("LSP enrichment failed for {}: {}", path.display(), e);
            }
        }

        Ok(())
    }

    async fn handle_file_deleted(&self, cancel: &CancellationToken, path: &Path) {
        tracing::info!("Removing nodes for deleted file: {}", path.display());
        self.lock_pending().remove(path);
        let file_path = path.to_string_lossy();
        if let Err(e) = self.store.delete_nodes_by_file(cancel, &file_path) {
            tracing::warn!("Failed to delete nodes for {}: {}", path.display(), e);
        }
    }

    fn is_ignored(&self, path: &Path) -> bool {
        let rel = match path.strip_prefix(&self.root) {
            Ok(rel) => rel,
            Err(_) => return true,
        };
        for component in rel.components() {
            let name = component.as_os_str().to_string_lossy();
            if name.starts_with('.') || self.exclude_dirs.iter().any(|d| d == name.as_ref()) {
                return true;
            }
        }
        if let Some(ign) = &self.gitignore {
            if ign
                .matched_path_or_any_parents(path, path.is_dir())
                .is_ignore()
            {
                return true;
            }
        }
        false
    }

    // Held only across map mutation, never across I/O.
    fn lock_pending(&self) -> std::sync::MutexGuard<'_, DebounceMap> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn to_io(e: notify::Error) -> crate::IndexError {
    crate::IndexError::Io(std::io::Error::other(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    #[test]
    fn test_debounce_coalesces_rapid_writes() {
        let mut map = DebounceMap::new(Duration::from_millis(500));
        let start = Instant::now();
        let path = PathBuf::from("/ws/main.go");

        // Five writes inside the window arm a single entry.
        for i in 0..5 {
            map.record(path.clone(), start + Duration::from_millis(i * 50));
        }
        assert_eq!(map.len(), 1);

        // Nothing is ready before the (latest) deadline.
        assert!(map.take_ready(start + Duration::from_millis(400)).is_empty());

        // After the last write's deadline, exactly one flush.
        let ready = map.take_ready(start + Duration::from_millis(800));
        assert_eq!(ready, vec![path]);
        assert!(map.is_empty());
    }

    #[test]
    fn test_debounce_deadline_resets_on_new_event() {
        let mut map = DebounceMap::new(Duration::from_millis(500));
        let start = Instant::now();
        let path = PathBuf::from("/ws/a.py");

        map.record(path.clone(), start);
        // A second event at +400ms pushes the deadline to +900ms.
        map.record(path.clone(), start + Duration::from_millis(400));

        assert!(map.take_ready(start + Duration::from_millis(600)).is_empty());
        assert_eq!(
            map.take_ready(start + Duration::from_millis(1000)),
            vec![path]
        );
    }

    #[test]
    fn test_debounce_independent_files() {
        let mut map = DebounceMap::new(Duration::from_millis(500));
        let start = Instant::now();

        map.record(PathBuf::from("/ws/a.go"), start);
        map.record(PathBuf::from("/ws/b.go"), start + Duration::from_millis(300));

        let ready = map.take_ready(start + Duration::from_millis(600));
        assert_eq!(ready, vec![PathBuf::from("/ws/a.go")]);
        assert_eq!(map.len(), 1);
    }

    fn watcher_for(root: &Path) -> FileWatcher {
        FileWatcher::new(
            Arc::new(Scanner::new().unwrap()),
            GraphStore::new(Db::in_memory().unwrap()),
            Arc::new(LspService::new()),
            root,
            &Config::default(),
        )
    }

    #[test]
    fn test_is_ignored_rules() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "dist/\n").unwrap();
        let watcher = watcher_for(dir.path());
        let root = std::fs::canonicalize(dir.path()).unwrap();

        assert!(watcher.is_ignored(&root.join(".git/config")));
        assert!(watcher.is_ignored(&root.join("node_modules/pkg/index.js")));
        assert!(watcher.is_ignored(&root.join("__pycache__/mod.py")));
        assert!(watcher.is_ignored(&root.join("dist/bundle.js")));
        assert!(!watcher.is_ignored(&root.join("src/main.go")));
        // Outside the root is never ours to index.
        assert!(watcher.is_ignored(Path::new("/elsewhere/main.go")));
    }

    #[tokio::test]
    async fn test_reindex_missing_file_deletes_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = watcher_for(dir.path());
        let cancel = CancellationToken::new();

        let file = dir.path().join("gone.py");
        std::fs::write(&file, "def f():\n  pass\n").unwrap();
        let nodes = watcher.scanner.scan_file(&file).unwrap();
        let file_path = nodes[0].file_path.clone();
        watcher.store.bulk_upsert_nodes(&cancel, &nodes).unwrap();
        std::fs::remove_file(&file).unwrap();

        watcher.reindex_file(&cancel, Path::new(&file_path)).await.unwrap();
        assert!(watcher
            .store
            .get_symbols_in_file(&cancel, &file_path)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_reindex_replaces_stale_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = watcher_for(dir.path());
        let cancel = CancellationToken::new();

        let file = dir.path().join("mod.py");
        std::fs::write(&file, "def old_name():\n  pass\n").unwrap();
        // Enrichment will fail without pyright installed; the reindex
        // contract keeps that non-fatal, so nodes must still land.
        watcher.reindex_file(&cancel, &file).await.unwrap();

        std::fs::write(&file, "def new_name():\n  pass\n").unwrap();
        watcher.reindex_file(&cancel, &file).await.unwrap();

        let canonical = std::fs::canonicalize(&file).unwrap();
        let symbols = watcher
            .store
            .get_symbols_in_file(&cancel, &canonical.to_string_lossy())
            .unwrap();
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].name, "new_name");
    }
}
