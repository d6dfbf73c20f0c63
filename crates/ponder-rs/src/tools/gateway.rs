//! The [`ToolGateway`] seam between the agent and whatever executes tools.
//!
//! A gateway lists what it offers and runs one call at a time. Listings may
//! include non-callable resources; [`tool_defs`] filters those out and maps
//! each tool's input schema into the function-calling shape the model
//! backend expects.
//!
//! Results use the tool-server wire shape: either a list of content blocks
//! with an `isError` flag, or a bare `{"error": "..."}` object.

use crate::ToolDef;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors a gateway reports instead of a tool result.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The gateway cannot be reached at all. Fatal before the loop starts.
    #[error("tool gateway unavailable: {0}")]
    Connection(String),

    /// One call failed inside the gateway.
    #[error("{0}")]
    Call(String),

    /// Tool definitions could not be loaded.
    #[error("invalid tool definitions: {0}")]
    Definitions(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Boxed future returned by [`ToolGateway`] methods.
pub type GatewayFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, GatewayError>> + Send + 'a>>;

// ── Listing ───────────────────────────────────────────────────────

/// A callable tool as the gateway describes it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

/// One entry of a gateway listing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ToolEntry {
    Tool(ToolSpec),
    /// Readable data the gateway exposes. Not callable.
    Resource { uri: String, name: String },
}

impl ToolEntry {
    /// The callable tool, if this entry is one.
    pub fn as_tool(&self) -> Option<&ToolSpec> {
        match self {
            ToolEntry::Tool(spec) => Some(spec),
            ToolEntry::Resource { .. } => None,
        }
    }
}

/// Backend tool definitions for every callable entry, in listing order.
pub fn tool_defs(entries: &[ToolEntry]) -> Vec<ToolDef> {
    entries
        .iter()
        .filter_map(ToolEntry::as_tool)
        .map(|spec| {
            ToolDef::new(
                spec.name.clone(),
                spec.description.clone(),
                function_parameters(&spec.input_schema),
            )
        })
        .collect()
}

/// Map an input schema to an object schema that always carries `type`,
/// `properties` and `required`. Other keys (`$defs`, descriptions) are kept.
pub fn function_parameters(input_schema: &Value) -> Value {
    let mut schema = match input_schema {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    schema.insert("type".into(), json!("object"));
    schema.entry("properties").or_insert_with(|| json!({}));
    schema.entry("required").or_insert_with(|| json!([]));
    Value::Object(schema)
}

// ── Results ───────────────────────────────────────────────────────

/// One block of tool output.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: String,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            block_type: "text".into(),
            text: text.into(),
        }
    }
}

/// What a tool call produced, as the model will see it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ToolOutcome {
    Content {
        content: Vec<ContentBlock>,
        #[serde(rename = "isError", default)]
        is_error: bool,
    },
    Error {
        error: String,
    },
}

impl ToolOutcome {
    /// A successful text result.
    pub fn text(text: impl Into<String>) -> Self {
        ToolOutcome::Content {
            content: vec![ContentBlock::text(text)],
            is_error: false,
        }
    }

    /// Tool-side failure reported as content (`isError: true`).
    pub fn failed(text: impl Into<String>) -> Self {
        ToolOutcome::Content {
            content: vec![ContentBlock::text(text)],
            is_error: true,
        }
    }

    /// A call that never reached a tool (unknown name, bad arguments,
    /// gateway failure).
    pub fn error(message: impl Into<String>) -> Self {
        ToolOutcome::Error {
            error: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        match self {
            ToolOutcome::Content { is_error, .. } => *is_error,
            ToolOutcome::Error { .. } => true,
        }
    }

    /// Concatenated text of all blocks, or the error message.
    pub fn text_content(&self) -> String {
        match self {
            ToolOutcome::Content { content, .. } => content
                .iter()
                .map(|b| b.text.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
            ToolOutcome::Error { error } => error.clone(),
        }
    }

    /// The JSON payload placed in the tool message and the reflection prompt.
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ── ToolGateway ───────────────────────────────────────────────────

/// Lists and invokes tools on behalf of the agent loop.
///
/// Uses boxed futures so the harness can hold a `&dyn ToolGateway`.
/// [`ToolSet`](super::core::ToolSet) implements it for in-process tools.
pub trait ToolGateway: Send + Sync {
    /// Everything the gateway offers. A failure here means the gateway is
    /// unusable and the query does not start.
    fn list_tools(&self) -> GatewayFuture<'_, Vec<ToolEntry>>;

    /// Run one tool. Tool-side failures belong in the returned
    /// [`ToolOutcome`]; `Err` is for failures of the gateway itself.
    fn call_tool<'a>(&'a self, name: &'a str, arguments: &'a Value) -> GatewayFuture<'a, ToolOutcome>;
}
