//! MCP server implementation for codemap.
//!
//! Exposes the code graph as MCP tools and prompts that AI assistants can
//! discover and use for impact analysis and symbol navigation.

use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, GetPromptRequestParam, GetPromptResult,
    Implementation, ListPromptsResult, ListToolsResult, PaginatedRequestParam, PromptsCapability,
    ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{ErrorData as McpError, ServerHandler, ServiceExt};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{prompts, tools, AppState};

/// Helper to convert JSON value to Arc<JsonObject> for tool schemas
fn json_schema(value: serde_json::Value) -> Arc<serde_json::Map<String, serde_json::Value>> {
    match value {
        serde_json::Value::Object(map) => Arc::new(map),
        _ => Arc::new(serde_json::Map::new()),
    }
}

/// Helper to create a tool definition
fn tool(name: &'static str, description: &'static str, schema: serde_json::Value) -> Tool {
    Tool {
        name: name.into(),
        title: None,
        description: Some(description.into()),
        input_schema: json_schema(schema),
        output_schema: None,
        annotations: None,
        icons: None,
    }
}

/// codemap MCP server
pub struct CodemapServer {
    state: Arc<AppState>,
}

impl CodemapServer {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Build the list of available tools.
    fn tools() -> Vec<Tool> {
        vec![
            tool(
                "index",
                "Scans the workspace and updates the code graph. Set force=true to rebuild from scratch.",
                json!({
                    "type": "object",
                    "properties": {
                        "force": {
                            "type": "boolean",
                            "description": "Clear the existing graph before scanning"
                        }
                    }
                }),
            ),
            tool(
                "index_status",
                "Returns the current indexing status of the workspace",
                json!({
                    "type": "object",
                    "properties": {}
                }),
            ),
            tool(
                "get_symbols_in_file",
                "Returns the structure of a file: every function, class, interface and type defined in it, with positions.",
                json!({
                    "type": "object",
                    "properties": {
                        "file_path": {
                            "type": "string",
                            "description": "Absolute path of the file to inspect"
                        }
                    },
                    "required": ["file_path"]
                }),
            ),
            tool(
                "find_impact",
                "Finds downstream dependents of a symbol: every symbol that transitively reaches it through the reference graph. Use this before modifying a function to see its blast radius.",
                json!({
                    "type": "object",
                    "properties": {
                        "symbol_name": {
                            "type": "string",
                            "description": "Name of the symbol to analyze"
                        }
                    },
                    "required": ["symbol_name"]
                }),
            ),
            tool(
                "get_symbol_location",
                "Finds where a symbol is defined, with file path and exact position.",
                json!({
                    "type": "object",
                    "properties": {
                        "symbol_name": {
                            "type": "string",
                            "description": "Name of the symbol to locate"
                        }
                    },
                    "required": ["symbol_name"]
                }),
            ),
        ]
    }
}

impl ServerHandler for CodemapServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities {
                tools: Some(rmcp::model::ToolsCapability {
                    list_changed: Some(false),
                }),
                prompts: Some(PromptsCapability {
                    list_changed: Some(false),
                }),
                ..Default::default()
            },
            server_info: Implementation {
                name: "codemap".into(),
                title: Some("Codemap Code Graph".into()),
                version: env!("CARGO_PKG_VERSION").into(),
                icons: None,
                website_url: Some("https://github.com/ctxhub/codemap".into()),
            },
            instructions: Some(
                "codemap maintains an always-fresh semantic graph of this workspace.\n\n\
                 • find_impact: the blast radius of changing a symbol - who would break\n\
                 • get_symbol_location: precise definition sites for a symbol name\n\
                 • get_symbols_in_file: the structure of one file\n\
                 • index / index_status: refresh the graph and inspect its state\n\n\
                 The graph is kept current by a file watcher; run index only after large \
                 external changes (branch switches, generators)."
                    .into(),
            ),
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        async move {
            Ok(ListToolsResult {
                tools: Self::tools(),
                next_cursor: None,
            })
        }
    }

    fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        let state = self.state.clone();
        async move {
            let name = request.name.as_ref();
            let args = request
                .arguments
                .map(serde_json::Value::Object)
                .unwrap_or(serde_json::Value::Object(Default::default()));

            info!("Calling tool: {} with args: {}", name, args);

            match name {
                "index" => {
                    let input: tools::IndexInput = serde_json::from_value(args)
                        .map_err(|e| McpError::invalid_params(e.to_string(), None))?;
                    Ok(tools::index(state, input).await)
                }

                "index_status" => {
                    let input: tools::IndexStatusInput = serde_json::from_value(args)
                        .map_err(|e| McpError::invalid_params(e.to_string(), None))?;
                    Ok(tools::index_status(state, input).await)
                }

                "get_symbols_in_file" => {
                    let input: tools::GetSymbolsInFileInput = serde_json::from_value(args)
                        .map_err(|e| McpError::invalid_params(e.to_string(), None))?;
                    Ok(tools::get_symbols_in_file(state, input).await)
                }

                "find_impact" => {
                    let input: tools::FindImpactInput = serde_json::from_value(args)
                        .map_err(|e| McpError::invalid_params(e.to_string(), None))?;
                    Ok(tools::find_impact(state, input).await)
                }

                "get_symbol_location" => {
                    let input: tools::GetSymbolLocationInput = serde_json::from_value(args)
                        .map_err(|e| McpError::invalid_params(e.to_string(), None))?;
                    Ok(tools::get_symbol_location(state, input).await)
                }

                _ => Ok(CallToolResult::error(vec![Content::text(format!(
                    "Unknown tool: {}",
                    name
                ))])),
            }
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn list_prompts(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListPromptsResult, McpError>> + Send + '_ {
        async move {
            Ok(ListPromptsResult {
                prompts: prompts::prompts(),
                next_cursor: None,
            })
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn get_prompt(
        &self,
        request: GetPromptRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<GetPromptResult, McpError>> + Send + '_ {
        async move { prompts::get_prompt(&request) }
    }
}

/// Run the MCP server on stdio until it exits or the token is cancelled.
pub async fn run_server(state: Arc<AppState>, cancel: CancellationToken) -> anyhow::Result<()> {
    let server = CodemapServer::new(state);
    let transport = rmcp::transport::stdio();

    info!("Starting MCP server on stdio...");

    let running = server.serve(transport).await?;

    tokio::select! {
        quit = running.waiting() => {
            quit?;
        }
        _ = cancel.cancelled() => {
            info!("Shutting down MCP server...");
        }
    }

    Ok(())
}
