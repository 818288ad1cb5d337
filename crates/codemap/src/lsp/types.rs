//! Wire types for the subset of the Language Server Protocol the
//! enrichment orchestrator drives.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// Outgoing request or notification. `id: None` makes it a notification.
#[derive(Debug, Serialize)]
pub struct Request<P: Serialize> {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub method: &'static str,
    pub params: P,
}

/// Incoming message, decoded just far enough to correlate responses.
#[derive(Debug, Deserialize)]
pub struct RawResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
    #[serde(default)]
    pub id: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub process_id: u32,
    pub root_uri: String,
    pub capabilities: ClientCapabilities,
}

/// Deliberately empty: the orchestrator only issues basic position requests
/// and needs no capability negotiation.
#[derive(Debug, Default, Serialize)]
pub struct ClientCapabilities {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// 0-based line
    pub line: u32,
    /// 0-based character
    pub character: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub uri: String,
    pub range: Range,
}

#[derive(Debug, Serialize)]
pub struct TextDocumentIdentifier {
    pub uri: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocumentItem {
    pub uri: String,
    pub language_id: String,
    pub version: i32,
    pub text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DidOpenTextDocumentParams {
    pub text_document: TextDocumentItem,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DidCloseTextDocumentParams {
    pub text_document: TextDocumentIdentifier,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocumentPositionParams {
    pub text_document: TextDocumentIdentifier,
    pub position: Position,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceParams {
    pub text_document: TextDocumentIdentifier,
    pub position: Position,
    pub context: ReferenceContext,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceContext {
    pub include_declaration: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSymbolParams {
    pub text_document: TextDocumentIdentifier,
}

#[derive(Debug, Deserialize)]
pub struct Hover {
    #[serde(default)]
    pub contents: Value,
    #[serde(default)]
    pub range: Option<Range>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSymbol {
    pub name: String,
    #[serde(default)]
    pub detail: Option<String>,
    pub kind: u32,
    pub range: Range,
    pub selection_range: Range,
    #[serde(default)]
    pub children: Option<Vec<DocumentSymbol>>,
}

/// Parse a definition/references/implementation response.
///
/// Servers answer with `null`, a single `Location`, or `[Location]`; all
/// three shapes collapse into a vector.
pub fn parse_locations(value: Value) -> Result<Vec<Location>> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    if value.is_object() {
        let single: Location = serde_json::from_value(value)?;
        return Ok(vec![single]);
    }
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_locations_single() {
        let value = json!({
            "uri": "file:///tmp/a.go",
            "range": {"start": {"line": 2, "character": 5}, "end": {"line": 2, "character": 11}}
        });
        let locs = parse_locations(value).unwrap();
        assert_eq!(locs.len(), 1);
        assert_eq!(locs[0].uri, "file:///tmp/a.go");
        assert_eq!(locs[0].range.start.line, 2);
    }

    #[test]
    fn test_parse_locations_array() {
        let value = json!([
            {"uri": "file:///a", "range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 1}}},
            {"uri": "file:///b", "range": {"start": {"line": 4, "character": 2}, "end": {"line": 4, "character": 9}}}
        ]);
        let locs = parse_locations(value).unwrap();
        assert_eq!(locs.len(), 2);
        assert_eq!(locs[1].uri, "file:///b");
    }

    #[test]
    fn test_parse_locations_null() {
        assert!(parse_locations(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_notification_serializes_without_id() {
        let notif = Request {
            jsonrpc: "2.0",
            id: None,
            method: "initialized",
            params: serde_json::json!({}),
        };
        let text = serde_json::to_string(&notif).unwrap();
        assert!(!text.contains("\"id\""));
    }

    #[test]
    fn test_position_params_camel_case() {
        let params = TextDocumentPositionParams {
            text_document: TextDocumentIdentifier {
                uri: "file:///x".to_string(),
            },
            position: Position { line: 1, character: 2 },
        };
        let text = serde_json::to_string(&params).unwrap();
        assert!(text.contains("textDocument"));
        assert!(text.contains("\"character\":2"));
    }
}
