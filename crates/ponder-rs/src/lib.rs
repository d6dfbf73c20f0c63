//! ReAct agent host with budget-aware context management.
//!
//! `ponder-rs` drives an iterative Thought → Action → Observation loop: it
//! calls a chat model, runs the tools the model asks for, feeds the results
//! back, and stops once the model produces a well-reasoned `Final Answer:`.
//! The conversation transcript keeps growing, so every append goes through a
//! [`ContextStore`](context::ContextStore) that windows or summarizes the
//! history before it outgrows the model's context window.
//!
//! # Getting started
//!
//! ```ignore
//! use ponder_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ChatClient::openai(std::env::var("OPENAI_API_KEY")?)?;
//!     let tools = ToolSet::new().with(search_papers_tool());
//!
//!     let config = AgentConfig::new("gpt-4o")
//!         .with_max_iterations(10)
//!         .with_temperature(0.7);
//!
//!     let result = Harness::new(&client, &tools, config)
//!         .with_event_handler(&LoggingHandler)
//!         .run("find ML papers from 2020")
//!         .await?;
//!
//!     println!("{}", result.final_answer().unwrap_or("(no final answer)"));
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Run the loop:** [`Harness`](agent::harness::Harness) and
//!   [`AgentConfig`](agent::config::AgentConfig). The outcome of a query is a
//!   [`RunResult`](agent::result::RunResult) whose
//!   [`LoopState`](agent::result::LoopState) tells a final answer apart from
//!   exhaustion, failure, and cancellation.
//! - **Decide when the agent is done:**
//!   [`CompletionJudge`](agent::judge::CompletionJudge).
//! - **Keep the transcript in budget:** [`context::store`] (policy),
//!   [`context::groups`] (atomic message groups), [`context::tokens`]
//!   (estimation), [`context::summarizer`] (compression prompt).
//! - **Plug in a model:** implement [`ModelBackend`](api::backend::ModelBackend),
//!   or use [`ChatClient`] for OpenAI-compatible and Azure endpoints and
//!   [`ScriptedBackend`](api::mock::ScriptedBackend) for tests and demos.
//! - **Plug in tools:** implement [`ToolGateway`](tools::gateway::ToolGateway),
//!   or register [`Tool`](tools::core::Tool)s in a
//!   [`ToolSet`](tools::core::ToolSet), which is a gateway itself.
//! - **Keep a record:** [`TranscriptSink`](agent::sink::TranscriptSink) and
//!   the plain-text [`FileTranscriptSink`](agent::sink::FileTranscriptSink).
//! - **Observe a run:** [`EventHandler`](agent::events::EventHandler).

pub mod agent;
pub mod api;
pub mod context;
pub mod prelude;
pub mod tools;

use crate::api::backend::BackendError;
use crate::api::retry::{RetryConfig, retry_with_backoff};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

// Re-export schemars for downstream crates.
pub use schemars;

// ── Constants ──────────────────────────────────────────────────────

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default model for all LLM calls.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Default Azure OpenAI REST API version.
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-02-15-preview";

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`. This is the bridge between strong Rust types
/// and the `serde_json::Value` that the function-calling API expects.
///
/// # Example
///
/// ```
/// use ponder_rs::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct SearchArgs {
///     query: String,
///     #[serde(default)]
///     limit: Option<u32>,
/// }
///
/// let schema = json_schema_for::<SearchArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"query".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// A message in the conversation.
///
/// One variant per role, each carrying only the fields that role may have.
/// Serializes to the chat-completions wire shape (`{"role": "...", ...}`).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ToolCall>>,
    },
    Tool {
        tool_call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        content: String,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: Some(content.into()),
            tool_calls: None,
        }
    }

    /// An assistant turn requesting tool calls. An empty `calls` vector
    /// produces a plain text turn so the wire shape never carries `[]`.
    pub fn assistant_tool_calls(content: Option<String>, calls: Vec<ToolCall>) -> Self {
        Message::Assistant {
            content,
            tool_calls: if calls.is_empty() { None } else { Some(calls) },
        }
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Message::Tool {
            tool_call_id: call_id.into(),
            name: Some(name.into()),
            content: content.into(),
        }
    }

    pub fn role(&self) -> MessageRole {
        match self {
            Message::System { .. } => MessageRole::System,
            Message::User { .. } => MessageRole::User,
            Message::Assistant { .. } => MessageRole::Assistant,
            Message::Tool { .. } => MessageRole::Tool,
        }
    }

    /// Text content, if the message has any.
    pub fn content(&self) -> Option<&str> {
        match self {
            Message::System { content } | Message::User { content } => Some(content),
            Message::Assistant { content, .. } => content.as_deref(),
            Message::Tool { content, .. } => Some(content),
        }
    }

    /// Tool calls requested by an assistant message (empty for other roles).
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::Assistant {
                tool_calls: Some(calls),
                ..
            } => calls,
            _ => &[],
        }
    }

    /// The call id a tool message answers.
    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            Message::Tool { tool_call_id, .. } => Some(tool_call_id),
            _ => None,
        }
    }

    /// The `name` field (tool messages only).
    pub fn name(&self) -> Option<&str> {
        match self {
            Message::Tool { name, .. } => name.as_deref(),
            _ => None,
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Message::System { .. })
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Message::User { .. })
    }

    pub fn is_tool(&self) -> bool {
        matches!(self, Message::Tool { .. })
    }
}

// ── Tool types ─────────────────────────────────────────────────────

/// The type of a tool definition. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ToolType {
    #[serde(rename = "function")]
    Function,
}

/// Tool definition sent to the API (OpenAI function-calling format).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub function: FunctionDef,
}

impl ToolDef {
    /// Create a function-calling tool definition.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: ToolType::Function,
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// The type of a tool call. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum CallType {
    #[serde(rename = "function")]
    Function,
}

/// A tool call returned by the model.
///
/// Arguments travel as a JSON-encoded string on the wire; use
/// [`ToolCall::arguments`] to get the decoded object.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: CallType,
    pub function: FunctionCallData,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FunctionCallData {
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    /// Build a function call from decoded arguments.
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: &serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            call_type: CallType::Function,
            function: FunctionCallData {
                name: name.into(),
                arguments: arguments.to_string(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// Decode the argument string. An empty string decodes to `{}`.
    pub fn arguments(&self) -> Result<serde_json::Value, serde_json::Error> {
        let raw = self.function.arguments.trim();
        if raw.is_empty() {
            return Ok(serde_json::Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(raw)
    }
}

// ── Request types ──────────────────────────────────────────────────

/// How the model may use the offered tools.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
}

/// Chat completion request body. Unused optional fields are omitted from
/// serialization.
#[derive(Serialize, Debug, Default)]
pub struct ChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

// ── Response types ─────────────────────────────────────────────────

/// Raw API response (internal deserialization target).
#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

/// Clean return type from [`ChatClient::chat`].
#[derive(Debug)]
pub struct ChatCompletion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<UsageInfo>,
    pub finish_reason: Option<String>,
}

/// Token usage statistics.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

// ── Client ─────────────────────────────────────────────────────────

/// Where a [`ChatClient`] sends its requests.
#[derive(Debug, Clone)]
pub enum Endpoint {
    /// Any OpenAI-compatible server (`{base_url}/chat/completions`, bearer auth).
    OpenAi { base_url: String },
    /// An Azure OpenAI deployment (`api-key` header, `api-version` query).
    Azure {
        endpoint: String,
        deployment: String,
        api_version: String,
    },
}

impl Endpoint {
    fn completions_url(&self) -> String {
        match self {
            Endpoint::OpenAi { base_url } => {
                format!("{}/chat/completions", base_url.trim_end_matches('/'))
            }
            Endpoint::Azure {
                endpoint,
                deployment,
                api_version,
            } => format!(
                "{}/openai/deployments/{deployment}/chat/completions?api-version={api_version}",
                endpoint.trim_end_matches('/')
            ),
        }
    }
}

/// Async HTTP client for OpenAI-compatible chat completions APIs.
pub struct ChatClient {
    pub(crate) client: reqwest::Client,
    pub(crate) api_key: String,
    pub(crate) endpoint: Endpoint,
    pub(crate) retry: RetryConfig,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("endpoint", &self.endpoint)
            .field("retry", &self.retry)
            .finish()
    }
}

impl ChatClient {
    /// Create a client for the public OpenAI API.
    pub fn openai(api_key: impl Into<String>) -> Result<Self, BackendError> {
        Self::with_endpoint(
            api_key,
            Endpoint::OpenAi {
                base_url: OPENAI_BASE_URL.to_string(),
            },
        )
    }

    /// Create a client for an Azure OpenAI deployment.
    pub fn azure(
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        deployment: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Result<Self, BackendError> {
        Self::with_endpoint(
            api_key,
            Endpoint::Azure {
                endpoint: endpoint.into(),
                deployment: deployment.into(),
                api_version: api_version.into(),
            },
        )
    }

    /// Create a client for an arbitrary endpoint.
    pub fn with_endpoint(
        api_key: impl Into<String>,
        endpoint: Endpoint,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("ponder-rs/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| BackendError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint,
            retry: RetryConfig::default(),
        })
    }

    /// Point an OpenAI-style client at another base URL (local servers,
    /// proxies). Has no effect on Azure clients.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        if let Endpoint::OpenAi { .. } = self.endpoint {
            self.endpoint = Endpoint::OpenAi {
                base_url: base_url.into(),
            };
        }
        self
    }

    /// Retry transient failures (timeouts, 429, 5xx) with backoff.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Send a chat completion request, retrying per the configured policy.
    pub async fn chat(&self, body: &ChatRequest) -> Result<ChatCompletion, BackendError> {
        retry_with_backoff(&self.retry, || self.send_once(body)).await
    }

    async fn send_once(&self, body: &ChatRequest) -> Result<ChatCompletion, BackendError> {
        let tool_count = body.tools.as_ref().map_or(0, |t| t.len());
        debug!(
            "LLM request: model={}, messages={}, tools={}, temp={:?}",
            body.model.as_deref().unwrap_or("(deployment)"),
            body.messages.len(),
            tool_count,
            body.temperature,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();

        let request = self.client.post(self.endpoint.completions_url());
        let request = match self.endpoint {
            Endpoint::OpenAi { .. } => {
                request.header("Authorization", format!("Bearer {}", self.api_key))
            }
            Endpoint::Azure { .. } => request.header("api-key", &self.api_key),
        };

        let resp = request
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| BackendError::Request(format!("failed to read response: {e}")))?;

        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(BackendError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: RawChatResponse =
            serde_json::from_str(&text).map_err(|e| BackendError::Malformed(e.to_string()))?;

        if let Some(err) = parsed.error {
            return Err(BackendError::Api(err.message));
        }

        if let Some(ref usage) = parsed.usage {
            debug!(
                "Token usage: prompt={}, completion={}, total={}",
                usage.prompt_tokens.unwrap_or(0),
                usage.completion_tokens.unwrap_or(0),
                usage.total_tokens.unwrap_or(0),
            );
        }

        let choice = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| BackendError::Malformed("response contained no choices".into()))?;

        let tool_calls = choice.message.tool_calls.unwrap_or_default();
        debug!(
            "LLM output: {} chars text, {} tool call(s)",
            choice.message.content.as_ref().map_or(0, |s| s.len()),
            tool_calls.len()
        );

        Ok(ChatCompletion {
            content: choice.message.content,
            tool_calls,
            usage: parsed.usage,
            finish_reason: choice.finish_reason,
        })
    }
}
