//! Guided prompts that teach agents to chain the graph tools.

use rmcp::model::{
    GetPromptRequestParam, GetPromptResult, Prompt, PromptArgument, PromptMessage,
    PromptMessageRole,
};
use rmcp::ErrorData as McpError;

fn argument(name: &str, description: &str) -> PromptArgument {
    PromptArgument {
        name: name.to_string(),
        title: None,
        description: Some(description.to_string()),
        required: Some(true),
    }
}

/// The prompt catalogue.
pub fn prompts() -> Vec<Prompt> {
    vec![
        Prompt::new(
            "analyze-impact",
            Some("Analyzes the potential impact of modifying a symbol"),
            Some(vec![argument(
                "symbol_name",
                "The name of the symbol to analyze",
            )]),
        ),
        Prompt::new(
            "explore-file",
            Some("Explores the structure and symbols of a file"),
            Some(vec![argument("file_path", "The path to the file to explore")]),
        ),
        Prompt::new(
            "locate-and-explain",
            Some("Locates a symbol and explains its context in the file"),
            Some(vec![argument(
                "symbol_name",
                "The name of the symbol to locate",
            )]),
        ),
        Prompt::new(
            "re-index-workspace",
            Some("Triggers a re-index of the workspace to refresh the code graph"),
            None,
        ),
    ]
}

fn required_argument(request: &GetPromptRequestParam, name: &str) -> Result<String, McpError> {
    request
        .arguments
        .as_ref()
        .and_then(|args| args.get(name))
        .and_then(|value| value.as_str())
        .map(str::to_string)
        .ok_or_else(|| McpError::invalid_params(format!("missing required argument: {name}"), None))
}

/// Resolve one prompt request into its message.
pub fn get_prompt(request: &GetPromptRequestParam) -> Result<GetPromptResult, McpError> {
    match request.name.as_str() {
        "analyze-impact" => {
            let symbol_name = required_argument(request, "symbol_name")?;
            Ok(GetPromptResult {
                description: Some(format!("Analyze impact of modifying {symbol_name}")),
                messages: vec![PromptMessage::new_text(
                    PromptMessageRole::User,
                    format!(
                        "I'm planning to modify {symbol_name}. Please find its definition using \
                         get_symbol_location and then use find_impact to identify all downstream \
                         symbols that might be broken or affected by this change."
                    ),
                )],
            })
        }
        "explore-file" => {
            let file_path = required_argument(request, "file_path")?;
            Ok(GetPromptResult {
                description: Some(format!("Explore file {file_path}")),
                messages: vec![PromptMessage::new_text(
                    PromptMessageRole::User,
                    format!(
                        "Explain the structure of the file at {file_path}. Use \
                         get_symbols_in_file to list all symbols and provide a high-level \
                         summary of their roles."
                    ),
                )],
            })
        }
        "locate-and-explain" => {
            let symbol_name = required_argument(request, "symbol_name")?;
            Ok(GetPromptResult {
                description: Some(format!("Locate and explain {symbol_name}")),
                messages: vec![PromptMessage::new_text(
                    PromptMessageRole::User,
                    format!(
                        "Where is {symbol_name} defined? Use get_symbol_location to find it, \
                         then use get_symbols_in_file on that file to explain what other \
                         symbols are related to it in that context."
                    ),
                )],
            })
        }
        "re-index-workspace" => Ok(GetPromptResult {
            description: Some("Re-index the workspace".to_string()),
            messages: vec![PromptMessage::new_text(
                PromptMessageRole::User,
                "The codebase has changed. Please run the index tool to update the semantic \
                 graph and report how many symbols and relationships are now tracked.",
            )],
        }),
        other => Err(McpError::invalid_params(
            format!("Unknown prompt: {other}"),
            None,
        )),
    }
}
