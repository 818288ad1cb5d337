//! LSP enrichment orchestrator.
//!
//! Detects required languages from a node batch, starts (or reuses) one
//! client per language, waits for server-side indexing, then drives
//! reference and implementation queries across a worker pool, resolving each
//! returned location back onto a graph node to synthesize edges.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::client::Client;
use super::servers;
use crate::config::LspConfig;
use crate::store::{NodeResolver, DEFINITION_KINDS};
use crate::uri::{path_to_uri, uri_to_path};
use crate::{Edge, IndexError, Node, Relation, Result};

const NUM_WORKERS: usize = 10;
/// Language servers need time to index the workspace before `references`
/// answers are complete; on a cold start we pay this bound once.
const MIN_INDEX_TIME: Duration = Duration::from_secs(5);

pub fn is_definition_kind(kind: &str) -> bool {
    DEFINITION_KINDS.contains(&kind)
}

pub fn is_interface_kind(kind: &str) -> bool {
    kind == "interface_declaration" || kind == "protocol_declaration"
}

/// Manages LSP clients for the languages present in the workspace.
pub struct LspService {
    clients: Mutex<HashMap<String, Arc<Client>>>,
    config: LspConfig,
}

impl LspService {
    pub fn new() -> Self {
        Self::with_config(LspConfig::default())
    }

    pub fn with_config(config: LspConfig) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub async fn get_client(&self, lang: &str) -> Option<Arc<Client>> {
        self.clients.lock().await.get(lang).cloned()
    }

    /// Start a language server unless one is already running for `lang`.
    pub async fn start_client(
        &self,
        cancel: &CancellationToken,
        lang: &str,
        cmd: &str,
        args: &[String],
    ) -> Result<()> {
        let mut clients = self.clients.lock().await;
        if clients.contains_key(lang) {
            return Ok(());
        }

        let cwd = std::env::current_dir()?;
        let root_uri = path_to_uri(&cwd);
        let client = Client::spawn(cancel, lang, cmd, args, root_uri).await?;
        clients.insert(lang.to_string(), client);
        Ok(())
    }

    /// Kill every running language server. Close of open documents is
    /// best-effort.
    pub async fn shutdown(&self) {
        let clients: Vec<Arc<Client>> = self.clients.lock().await.values().cloned().collect();
        for client in clients {
            client.shutdown().await;
        }
    }

    /// Turn a bare node batch into edges by querying language servers.
    ///
    /// Per-node failures are swallowed (not every symbol has references);
    /// the run as a whole fails only when a required server is missing or
    /// none could be started.
    pub async fn enrich(
        &self,
        cancel: &CancellationToken,
        nodes: &[Node],
        resolver: Arc<dyn NodeResolver>,
    ) -> Result<Vec<Edge>> {
        let required = detect_required_languages(nodes);
        if required.is_empty() {
            tracing::info!("No supported languages detected");
            return Ok(Vec::new());
        }

        self.validate_language_servers(&required)?;

        let started = self.start_language_servers(cancel, &required).await;
        if started.is_empty() {
            return Err(IndexError::NoServersStarted);
        }

        self.wait_for_indexing(&started).await;

        let queue: VecDeque<Node> = nodes.iter().cloned().collect();
        let queue = Arc::new(StdMutex::new(queue));
        let opened: Arc<Mutex<HashMap<String, String>>> = Arc::new(Mutex::new(HashMap::new()));
        let clients = Arc::new(started);

        let mut workers = JoinSet::new();
        for _ in 0..NUM_WORKERS {
            workers.spawn(worker(
                queue.clone(),
                clients.clone(),
                opened.clone(),
                resolver.clone(),
                cancel.clone(),
            ));
        }

        let mut edges = Vec::new();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(worker_edges) => edges.extend(worker_edges),
                Err(e) => tracing::warn!("Enrichment worker failed: {}", e),
            }
        }

        // Close everything the run opened.
        let opened = opened.lock().await;
        for (uri, lang) in opened.iter() {
            if let Some(client) = clients.get(lang.as_str()) {
                let _ = client.did_close(uri).await;
            }
        }

        tracing::info!("Enrichment complete: {} edges generated", edges.len());
        Ok(edges)
    }

    fn validate_language_servers(&self, required: &HashSet<&'static str>) -> Result<()> {
        let mut missing = Vec::new();
        let mut instructions = Vec::new();

        for &lang in required {
            let Some((cmd, _)) = servers::server_command(lang, &self.config) else {
                continue;
            };
            if !servers::is_command_available(&cmd) {
                missing.push(lang);
                if let Some(instruction) = servers::install_instructions(lang) {
                    instructions.push(format!("  {lang}: {instruction}"));
                }
            }
        }

        if missing.is_empty() {
            return Ok(());
        }

        missing.sort_unstable();
        let first_cmd = servers::server_command(missing[0], &self.config)
            .map(|(cmd, _)| cmd)
            .unwrap_or_else(|| "gopls".to_string());

        // Partial enrichment is worse than no graph: find_impact would
        // silently under-report, so this is a hard failure.
        Err(IndexError::MissingLanguageServers(format!(
            "Language server(s) not found: {missing:?}\n\n\
             codemap requires LSP servers for dependency analysis.\n\
             Without them, the find_impact tool will not work.\n\n\
             Install missing servers:\n{}\n\n\
             After installation, verify with: which {first_cmd}",
            instructions.join("\n"),
        )))
    }

    async fn start_language_servers(
        &self,
        cancel: &CancellationToken,
        required: &HashSet<&'static str>,
    ) -> HashMap<String, Arc<Client>> {
        let mut started = HashMap::new();
        for &lang in required {
            let Some((cmd, args)) = servers::server_command(lang, &self.config) else {
                continue;
            };
            match self.start_client(cancel, lang, &cmd, &args).await {
                Ok(()) => {
                    if let Some(client) = self.get_client(lang).await {
                        started.insert(lang.to_string(), client);
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to start {} language server: {}", lang, e);
                }
            }
        }
        started
    }

    /// Sleep out the remainder of [`MIN_INDEX_TIME`] measured from the most
    /// recently initialized server; a warm re-index pays nothing.
    async fn wait_for_indexing(&self, started: &HashMap<String, Arc<Client>>) {
        let newest = started.values().filter_map(|c| c.init_time()).max();
        let Some(newest) = newest else { return };

        let elapsed = newest.elapsed();
        if elapsed < MIN_INDEX_TIME {
            let wait = MIN_INDEX_TIME - elapsed;
            tracing::info!(
                "Waiting {:.1}s for language servers to index workspace...",
                wait.as_secs_f64()
            );
            tokio::time::sleep(wait).await;
        } else {
            tracing::debug!(
                "Language servers already had {:.1}s to index, proceeding immediately",
                elapsed.as_secs_f64()
            );
        }
    }
}

impl Default for LspService {
    fn default() -> Self {
        Self::new()
    }
}

/// Languages needed to enrich this node batch, by file extension.
pub fn detect_required_languages(nodes: &[Node]) -> HashSet<&'static str> {
    nodes
        .iter()
        .filter_map(|n| servers::language_for_path(&n.file_path))
        .collect()
}

async fn worker(
    queue: Arc<StdMutex<VecDeque<Node>>>,
    clients: Arc<HashMap<String, Arc<Client>>>,
    opened: Arc<Mutex<HashMap<String, String>>>,
    resolver: Arc<dyn NodeResolver>,
    cancel: CancellationToken,
) -> Vec<Edge> {
    let mut edges = Vec::new();

    loop {
        if cancel.is_cancelled() {
            return edges;
        }
        let node = {
            let mut queue = match queue.lock() {
                Ok(queue) => queue,
                Err(poisoned) => poisoned.into_inner(),
            };
            queue.pop_front()
        };
        let Some(node) = node else { return edges };

        if node.name.is_empty() || !is_definition_kind(&node.kind) {
            continue;
        }
        let Some(lang) = servers::language_for_path(&node.file_path) else {
            continue;
        };
        let Some(client) = clients.get(lang) else {
            continue;
        };

        let uri = path_to_uri(Path::new(&node.file_path));
        if !ensure_open(client, &opened, &uri, lang, &node.file_path).await {
            continue;
        }

        edges.extend(find_reference_edges(client, &cancel, &node, resolver.as_ref()).await);

        if is_interface_kind(&node.kind) {
            edges.extend(find_implementation_edges(client, &cancel, &node, resolver.as_ref()).await);
        }
    }
}

/// Open a document at most once per URI for this run; opens are serialized
/// through the lock on the opened map.
async fn ensure_open(
    client: &Arc<Client>,
    opened: &Arc<Mutex<HashMap<String, String>>>,
    uri: &str,
    lang: &str,
    file_path: &str,
) -> bool {
    let mut opened = opened.lock().await;
    if opened.contains_key(uri) {
        return true;
    }

    let text = match tokio::fs::read_to_string(file_path).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!("Failed to read file {}: {}", file_path, e);
            return false;
        }
    };
    if let Err(e) = client.did_open(uri, servers::language_id(lang), &text).await {
        tracing::warn!("Failed to open document {}: {}", uri, e);
        return false;
    }
    opened.insert(uri.to_string(), lang.to_string());
    true
}

/// References to this symbol, mapped back to their enclosing nodes.
async fn find_reference_edges(
    client: &Arc<Client>,
    cancel: &CancellationToken,
    node: &Node,
    resolver: &dyn NodeResolver,
) -> Vec<Edge> {
    let mut edges = Vec::new();
    let uri = path_to_uri(Path::new(&node.file_path));

    let locations = match client
        .references(cancel, &uri, node.line_start - 1, node.col_start - 1, false)
        .await
    {
        Ok(locations) => locations,
        // Not every symbol has references; per-node errors don't stop the run.
        Err(e) => {
            tracing::debug!("references({}) failed: {}", node.name, e);
            return edges;
        }
    };

    for location in locations {
        let target_path = uri_to_path(&location.uri);
        let target_path = target_path.to_string_lossy();
        let source = match resolver.find_containing_node(
            &target_path,
            location.range.start.line + 1,
            location.range.start.character + 1,
        ) {
            Ok(Some(source)) => source,
            _ => continue,
        };

        if source.id != node.id {
            edges.push(Edge {
                source_id: source.id,
                target_id: node.id.clone(),
                relation: Relation::References,
                created_at: Utc::now(),
            });
        }
    }

    edges
}

/// Implementations of an interface, mapped back to their defining nodes.
async fn find_implementation_edges(
    client: &Arc<Client>,
    cancel: &CancellationToken,
    node: &Node,
    resolver: &dyn NodeResolver,
) -> Vec<Edge> {
    let mut edges = Vec::new();
    let uri = path_to_uri(Path::new(&node.file_path));

    let locations = match client
        .implementation(cancel, &uri, node.line_start - 1, node.col_start - 1)
        .await
    {
        Ok(locations) => locations,
        Err(e) => {
            tracing::debug!("implementation({}) failed: {}", node.name, e);
            return edges;
        }
    };

    for location in locations {
        let target_path = uri_to_path(&location.uri);
        let target_path = target_path.to_string_lossy();
        let implementor = match resolver.find_containing_node(
            &target_path,
            location.range.start.line + 1,
            location.range.start.character + 1,
        ) {
            Ok(Some(implementor)) => implementor,
            _ => continue,
        };

        if implementor.id != node.id {
            edges.push(Edge {
                source_id: implementor.id,
                target_id: node.id.clone(),
                relation: Relation::Implements,
                created_at: Utc::now(),
            });
        }
    }

    edges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uri::node_id;

    fn make_node(file: &str, name: &str, kind: &str) -> Node {
        Node {
            id: node_id(file, name),
            name: name.to_string(),
            kind: kind.to_string(),
            file_path: file.to_string(),
            line_start: 1,
            line_end: 1,
            col_start: 1,
            col_end: 1 + name.len() as u32,
            symbol_uri: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_is_definition_kind() {
        assert!(is_definition_kind("function_declaration"));
        assert!(is_definition_kind("method_definition"));
        assert!(is_definition_kind("class_definition"));
        assert!(is_definition_kind("interface_declaration"));
        assert!(!is_definition_kind("variable_declarator"));
        assert!(!is_definition_kind("symbol"));
    }

    #[test]
    fn test_is_interface_kind() {
        assert!(is_interface_kind("interface_declaration"));
        assert!(is_interface_kind("protocol_declaration"));
        assert!(!is_interface_kind("class_definition"));
        assert!(!is_interface_kind("function_declaration"));
    }

    #[test]
    fn test_detect_required_languages() {
        let nodes = vec![
            make_node("/src/a.go", "A", "function_declaration"),
            make_node("/src/b.go", "B", "function_declaration"),
            make_node("/src/c.py", "C", "function_definition"),
            make_node("/src/d.tsx", "D", "function_declaration"),
        ];
        let langs = detect_required_languages(&nodes);
        assert_eq!(langs, HashSet::from(["go", "python", "typescript"]));
    }

    #[test]
    fn test_detect_required_languages_empty_for_unknown() {
        let nodes = vec![make_node("/src/a.rs", "A", "function_item")];
        assert!(detect_required_languages(&nodes).is_empty());
    }

    #[tokio::test]
    async fn test_enrich_no_supported_languages_is_empty_ok() {
        let service = LspService::new();
        let cancel = CancellationToken::new();
        let resolver: Arc<dyn NodeResolver> = Arc::new(SliceResolver { nodes: Vec::new() });

        let nodes = vec![make_node("/src/a.rs", "A", "function_item")];
        let edges = service.enrich(&cancel, &nodes, resolver).await.unwrap();
        assert!(edges.is_empty());
    }

    #[tokio::test]
    async fn test_enrich_missing_server_is_hard_error() {
        let config = LspConfig {
            go_path: Some("/definitely/not/a/real/gopls".to_string()),
            ..Default::default()
        };
        let service = LspService::with_config(config);
        let cancel = CancellationToken::new();
        let resolver: Arc<dyn NodeResolver> = Arc::new(SliceResolver { nodes: Vec::new() });

        let nodes = vec![make_node("/src/a.go", "A", "function_declaration")];
        let err = service.enrich(&cancel, &nodes, resolver).await.unwrap_err();
        match err {
            IndexError::MissingLanguageServers(msg) => {
                assert!(msg.contains("go"));
                assert!(msg.contains("Install missing servers"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    /// In-memory resolver over a node slice, standing in for the store.
    struct SliceResolver {
        nodes: Vec<Node>,
    }

    impl NodeResolver for SliceResolver {
        fn find_containing_node(
            &self,
            file_path: &str,
            line: u32,
            _col: u32,
        ) -> crate::Result<Option<Node>> {
            let mut best: Option<&Node> = None;
            for n in &self.nodes {
                if n.file_path == file_path && n.line_start <= line && n.line_end >= line {
                    let replace = match best {
                        None => true,
                        Some(b) => n.line_start >= b.line_start && n.line_end <= b.line_end,
                    };
                    if replace {
                        best = Some(n);
                    }
                }
            }
            Ok(best.cloned())
        }
    }

    #[test]
    fn test_slice_resolver_innermost() {
        let mut outer = make_node("/src/a.go", "Outer", "function_declaration");
        outer.line_start = 1;
        outer.line_end = 20;
        let mut inner = make_node("/src/a.go", "Inner", "function_declaration");
        inner.line_start = 5;
        inner.line_end = 10;

        let resolver = SliceResolver {
            nodes: vec![outer, inner],
        };
        let hit = resolver.find_containing_node("/src/a.go", 7, 1).unwrap().unwrap();
        assert_eq!(hit.name, "Inner");
    }
}
