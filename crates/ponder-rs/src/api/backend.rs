//! The [`ModelBackend`] seam between the agent and a chat model.
//!
//! A backend takes the managed message list, the offered tools, and sampling
//! settings, and returns one [`AssistantTurn`]. Failures are opaque to the
//! agent loop: any [`BackendError`] ends the query in the `Failed` state.

use crate::{ChatClient, ChatRequest, Message, ToolCall, ToolChoice, ToolDef, UsageInfo};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors a model backend can report.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The request never produced an HTTP response (DNS, connect, timeout).
    #[error("request failed: {0}")]
    Request(String),

    /// Non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The API answered with an error object.
    #[error("API error: {0}")]
    Api(String),

    /// The response body could not be understood.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// A scripted backend ran out of turns or was told to fail.
    #[error("scripted backend: {0}")]
    Script(String),
}

/// Boxed future returned by [`ModelBackend::complete`].
pub type BackendFuture<'a> =
    Pin<Box<dyn Future<Output = Result<AssistantTurn, BackendError>> + Send + 'a>>;

/// One completion request as the agent sees it.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDef>,
    pub tool_choice: ToolChoice,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    /// A tool-less request (used for summarization).
    pub fn text_only(model: impl Into<String>, messages: Vec<Message>, temperature: f32) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: Vec::new(),
            tool_choice: ToolChoice::None,
            temperature,
            max_tokens: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// What the model said back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantTurn {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<UsageInfo>,
}

impl AssistantTurn {
    /// A text-only turn.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// A turn that only requests tool calls.
    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Default::default()
        }
    }

    /// The turn as a transcript message.
    pub fn to_message(&self) -> Message {
        Message::assistant_tool_calls(self.content.clone(), self.tool_calls.clone())
    }
}

/// A chat model the agent can talk to.
///
/// Uses a boxed future so that the trait is dyn-compatible; the harness and
/// the context store hold `&dyn ModelBackend`.
pub trait ModelBackend: Send + Sync {
    fn complete<'a>(&'a self, request: &'a CompletionRequest) -> BackendFuture<'a>;
}

impl ChatRequest {
    /// Wire body for a [`CompletionRequest`]. Azure deployments pin the
    /// model themselves, so the model field is left out for them.
    pub fn from_completion(request: &CompletionRequest, send_model: bool) -> Self {
        let has_tools = !request.tools.is_empty();
        ChatRequest {
            model: send_model.then(|| request.model.clone()),
            messages: request.messages.clone(),
            max_tokens: request.max_tokens,
            temperature: Some(request.temperature),
            tools: has_tools.then(|| request.tools.clone()),
            tool_choice: has_tools.then_some(request.tool_choice),
        }
    }
}

impl ModelBackend for ChatClient {
    fn complete<'a>(&'a self, request: &'a CompletionRequest) -> BackendFuture<'a> {
        Box::pin(async move {
            let send_model = matches!(self.endpoint(), crate::Endpoint::OpenAi { .. });
            let body = ChatRequest::from_completion(request, send_model);
            let completion = self.chat(&body).await?;
            Ok(AssistantTurn {
                content: completion.content,
                tool_calls: completion.tool_calls,
                usage: completion.usage,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_body_omits_tool_choice_without_tools() {
        let req = CompletionRequest::text_only("gpt-4o", vec![Message::user("hi")], 0.3);
        let body = serde_json::to_value(ChatRequest::from_completion(&req, true)).unwrap();
        assert_eq!(body["model"], "gpt-4o");
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
        assert!((body["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn wire_body_with_tools_requests_auto() {
        let req = CompletionRequest {
            tools: vec![ToolDef::new("search", "Search", json!({"type": "object"}))],
            tool_choice: ToolChoice::Auto,
            ..CompletionRequest::text_only("gpt-4o", vec![Message::user("hi")], 0.7)
        };
        let body = serde_json::to_value(ChatRequest::from_completion(&req, false)).unwrap();
        assert!(body.get("model").is_none());
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["tools"][0]["function"]["name"], "search");
    }

    #[test]
    fn turn_to_message() {
        let call = ToolCall::function("c1", "search", &json!({}));
        let msg = AssistantTurn::tool_calls(vec![call]).to_message();
        assert_eq!(msg.tool_calls().len(), 1);
        assert_eq!(msg.content(), None);

        let msg = AssistantTurn::text("done").to_message();
        assert_eq!(msg.content(), Some("done"));
        assert!(msg.tool_calls().is_empty());
    }
}
