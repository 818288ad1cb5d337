//! Tool handlers over the code graph.
//!
//! Tools that read graph data first block on the readiness latch with a
//! 30-second bound, so callers get either fresh answers or an explicit
//! in-progress/failed message instead of a half-built graph.

use std::sync::Arc;
use std::time::Duration;

use rmcp::model::{CallToolResult, Content};
use serde::{Deserialize, Serialize};
use serde_json::json;

use codemap::{IndexError, IndexStatus};

use super::AppState;

const READY_WAIT: Duration = Duration::from_secs(30);

/// Input for the index tool
#[derive(Debug, Default, Deserialize)]
pub struct IndexInput {
    /// Clear the existing graph before scanning
    #[serde(default)]
    pub force: bool,
}

/// Input for the index_status tool
#[derive(Debug, Default, Deserialize)]
pub struct IndexStatusInput {}

/// Input for the get_symbols_in_file tool
#[derive(Debug, Deserialize)]
pub struct GetSymbolsInFileInput {
    pub file_path: String,
}

/// Input for the find_impact tool
#[derive(Debug, Deserialize)]
pub struct FindImpactInput {
    pub symbol_name: String,
}

/// Input for the get_symbol_location tool
#[derive(Debug, Deserialize)]
pub struct GetSymbolLocationInput {
    pub symbol_name: String,
}

fn text_result(text: impl Into<String>) -> CallToolResult {
    CallToolResult::success(vec![Content::text(text.into())])
}

fn error_result(text: impl Into<String>) -> CallToolResult {
    CallToolResult::error(vec![Content::text(format!("ERROR: {}", text.into()))])
}

/// Block on the readiness latch; an `Err` is the tool result to return.
async fn wait_for_index(state: &AppState) -> Result<(), CallToolResult> {
    let wait = tokio::time::timeout(READY_WAIT, state.lifecycle.wait_for_ready(&state.cancel)).await;
    match wait {
        Ok(Ok(())) => Ok(()),
        Ok(Err(IndexError::IndexFailed(message))) => {
            Err(error_result(format!("Indexing failed: {message}")))
        }
        Ok(Err(e)) => Err(error_result(format!("Indexing wait failed: {e}"))),
        Err(_) => {
            let (status, _, _) = state.lifecycle.status();
            if status == IndexStatus::InProgress {
                Err(error_result("Indexing in progress, please try again"))
            } else {
                Err(error_result("Timed out waiting for the index"))
            }
        }
    }
}

/// Full scan/prune/enrich cycle; rejected while one is already running.
pub async fn index(state: Arc<AppState>, input: IndexInput) -> CallToolResult {
    match state.indexer.run_full(&state.cancel, input.force).await {
        Ok(stats) => text_result(format!(
            "Indexed {} nodes and {} edges in {:.2}s",
            stats.nodes,
            stats.edges,
            stats.duration.as_secs_f64()
        )),
        Err(IndexError::IndexInProgress) => error_result("Indexing already in progress"),
        Err(e) => error_result(format!("Index failed: {e}")),
    }
}

/// Report `{status, duration_seconds?, error?}`.
pub async fn index_status(state: Arc<AppState>, _input: IndexStatusInput) -> CallToolResult {
    let (status, error, duration) = state.lifecycle.status();

    let mut result = serde_json::Map::new();
    result.insert("status".to_string(), json!(status.as_str()));
    if let Some(duration) = duration {
        result.insert("duration_seconds".to_string(), json!(duration.as_secs_f64()));
    }
    if let Some(error) = error {
        result.insert("error".to_string(), json!(error));
    }

    match serde_json::to_string_pretty(&result) {
        Ok(body) => text_result(body),
        Err(e) => error_result(format!("Serialization failed: {e}")),
    }
}

/// The structure of one file: `[{name, kind, range}]`.
pub async fn get_symbols_in_file(
    state: Arc<AppState>,
    input: GetSymbolsInFileInput,
) -> CallToolResult {
    if let Err(reply) = wait_for_index(&state).await {
        return reply;
    }

    #[derive(Serialize)]
    struct SimpleNode {
        name: String,
        kind: String,
        range: String,
    }

    // The store keys files by canonical absolute path; resolve relative
    // inputs against the workspace root.
    let requested = std::path::Path::new(&input.file_path);
    let absolute = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        state.root.join(requested)
    };
    let file_path = std::fs::canonicalize(&absolute)
        .unwrap_or(absolute)
        .to_string_lossy()
        .to_string();

    let nodes = match state.store.get_symbols_in_file(&state.cancel, &file_path) {
        Ok(nodes) => nodes,
        Err(e) => return error_result(format!("Query failed: {e}")),
    };

    let simple: Vec<SimpleNode> = nodes
        .into_iter()
        .map(|n| SimpleNode {
            range: format!(
                "{}:{}-{}:{}",
                n.line_start, n.col_start, n.line_end, n.col_end
            ),
            name: n.name,
            kind: n.kind,
        })
        .collect();

    match serde_json::to_string_pretty(&simple) {
        Ok(body) => text_result(body),
        Err(e) => error_result(format!("Serialization failed: {e}")),
    }
}

/// Transitive reverse dependents of a symbol.
pub async fn find_impact(state: Arc<AppState>, input: FindImpactInput) -> CallToolResult {
    if let Err(reply) = wait_for_index(&state).await {
        return reply;
    }

    let nodes = match state.store.find_impact(&state.cancel, &input.symbol_name) {
        Ok(nodes) => nodes,
        Err(e) => return error_result(format!("Query failed: {e}")),
    };

    if nodes.is_empty() {
        return text_result("No impacted symbols found.");
    }

    #[derive(Serialize)]
    struct ImpactNode {
        name: String,
        file_path: String,
        kind: String,
    }

    let impacted: Vec<ImpactNode> = nodes
        .into_iter()
        .map(|n| ImpactNode {
            name: n.name,
            file_path: n.file_path,
            kind: n.kind,
        })
        .collect();

    match serde_json::to_string_pretty(&impacted) {
        Ok(body) => text_result(body),
        Err(e) => error_result(format!("Serialization failed: {e}")),
    }
}

/// All definition sites for a symbol name.
pub async fn get_symbol_location(
    state: Arc<AppState>,
    input: GetSymbolLocationInput,
) -> CallToolResult {
    if let Err(reply) = wait_for_index(&state).await {
        return reply;
    }

    let nodes = match state.store.get_symbol_location(&state.cancel, &input.symbol_name) {
        Ok(nodes) => nodes,
        Err(e) => return error_result(format!("Query failed: {e}")),
    };

    if nodes.is_empty() {
        return text_result("Symbol not found.");
    }

    match serde_json::to_string_pretty(&nodes) {
        Ok(body) => text_result(body),
        Err(e) => error_result(format!("Serialization failed: {e}")),
    }
}
