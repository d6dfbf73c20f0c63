//! Convenience re-exports for common `ponder-rs` types.
//!
//! Meant to be glob-imported when building agents:
//!
//! ```ignore
//! use ponder_rs::prelude::*;
//! ```
//!
//! This pulls in what most agent programs need: the [`ChatClient`],
//! [`Message`] constructors, [`Harness`] + config, the [`ToolGateway`] trait
//! with [`ToolSet`], event handlers, sinks, and the context configuration.
//! Internals (message groups, summarization prompts, token estimation) are
//! left out; import those from their modules directly when needed.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{ChatClient, Endpoint, Message, ToolCall, ToolDef, json_schema_for};

// ── Model backends ──────────────────────────────────────────────────
pub use crate::api::{AssistantTurn, BackendError, CompletionRequest, ModelBackend, ScriptedBackend};

// ── Agent runtime ───────────────────────────────────────────────────
pub use crate::agent::{
    AgentConfig, AgentError, AgentEvent, CompletionJudge, CompositeEventHandler, EventHandler,
    EventResponse, FileTranscriptSink, FnEventHandler, Harness, LoggingHandler, LoopState,
    MemorySink, NoopHandler, RunResult, SystemPromptBuilder, TranscriptSink,
};

// ── Context management ──────────────────────────────────────────────
pub use crate::context::{ContextConfig, ContextStore};

// ── Tools ───────────────────────────────────────────────────────────
pub use crate::tools::{
    FnTool, GatewayError, ShellCommandTool, Tool, ToolFuture, ToolGateway, ToolOutcome, ToolSet,
    load_tools, search_papers_tool,
};
