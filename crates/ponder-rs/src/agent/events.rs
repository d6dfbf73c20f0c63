//! Events and handlers for the [`Harness`](super::harness::Harness).
//!
//! The harness reports every step of a query through [`AgentEvent`]
//! variants, from iteration start through tool execution to the terminal
//! state. Callers implement [`EventHandler`] to observe them for logging,
//! progress display, or gating tool calls.
//!
//! # Choosing an event handler
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |
//! | Custom `impl EventHandler` | Full control (progress UI, approval gates) |

use crate::agent::judge::Verdict;
use crate::context::{CompressionTrigger, ContextUsage};
use crate::tools::ToolOutcome;
use serde_json::Value;
use tracing::{debug, error, info, warn};

// ── Events ─────────────────────────────────────────────────────────

/// Events emitted by the harness during a query.
#[derive(Debug)]
pub enum AgentEvent<'a> {
    /// A new iteration is starting. Handlers may answer with
    /// [`EventResponse::InjectMessage`] to add a user message before the
    /// model call.
    IterationStart {
        iteration: u32,
        max_iterations: u32,
        context_usage: &'a ContextUsage,
    },
    /// The model returned text (may be alongside tool calls).
    Text(&'a str),
    /// The model requested tool calls this iteration.
    ToolCallsReceived { iteration: u32, count: usize },
    /// A single tool is about to run. Handlers may answer with
    /// [`EventResponse::Deny`] to skip it.
    ToolExecuting { name: &'a str, arguments: &'a Value },
    /// A single tool call produced its observation.
    ToolResult {
        name: &'a str,
        call_id: &'a str,
        result: &'a ToolOutcome,
    },
    /// Token usage reported by the backend for this iteration.
    TokenUsage {
        prompt_tokens: u32,
        completion_tokens: u32,
    },
    /// The model claimed a final answer that the judge rejected.
    PrematureFinal { iteration: u32, verdict: &'a Verdict },
    /// The model neither acted nor concluded.
    NoAction { iteration: u32 },
    /// History was summarized.
    Compressed {
        trigger: CompressionTrigger,
        before_tokens: usize,
        after_tokens: usize,
    },
    /// Summarization failed and history was cut to the essentials.
    CompressionDegraded {
        trigger: CompressionTrigger,
        error: &'a str,
    },
    /// A sliding-window view was sent instead of the full transcript.
    Windowed { kept: usize, total: usize },
    /// The judge accepted a final answer.
    Finished { iteration: u32 },
    /// The iteration cap was reached without a final answer.
    Exhausted { max_iterations: u32 },
    /// The backend failed and the query stopped.
    Failed { iteration: u32, error: &'a str },
    /// The stop signal fired.
    Cancelled { iteration: u32 },
}

impl AgentEvent<'_> {
    /// Total tokens from a `TokenUsage` event.
    pub fn total_tokens(&self) -> Option<u64> {
        if let AgentEvent::TokenUsage {
            prompt_tokens,
            completion_tokens,
        } = self
        {
            Some(*prompt_tokens as u64 + *completion_tokens as u64)
        } else {
            None
        }
    }

    /// Whether this event ends the query.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentEvent::Finished { .. }
                | AgentEvent::Exhausted { .. }
                | AgentEvent::Failed { .. }
                | AgentEvent::Cancelled { .. }
        )
    }
}

/// Response from an event handler for events that support feedback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventResponse {
    /// Let the pending tool call run.
    Approve,
    /// Skip the pending tool call. The reason becomes its error observation.
    Deny(String),
    /// Add a user message before the next model call.
    InjectMessage(String),
}

/// Handler for agent events.
///
/// ```ignore
/// struct Progress;
///
/// impl EventHandler for Progress {
///     fn on_event(&self, event: &AgentEvent<'_>) -> Option<EventResponse> {
///         match event {
///             AgentEvent::ToolExecuting { name, .. } if *name == "shell" => {
///                 return Some(EventResponse::Deny("Shell disabled.".into()));
///             }
///             AgentEvent::Text(text) => eprintln!("{text}"),
///             _ => {}
///         }
///         None
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    /// Called for each event during the query. Return `None` for most
    /// events; the default implementation approves everything.
    fn on_event(&self, event: &AgentEvent<'_>) -> Option<EventResponse> {
        let _ = event;
        None
    }
}

/// A no-op event handler that approves all tool calls.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
///
/// ```ignore
/// let handler = FnEventHandler::new(|event| {
///     if let AgentEvent::Text(t) = event { println!("{t}"); }
///     None
/// });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&AgentEvent<'_>) -> Option<EventResponse> + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&AgentEvent<'_>) -> Option<EventResponse> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&AgentEvent<'_>) -> Option<EventResponse> + Send + Sync,
{
    fn on_event(&self, event: &AgentEvent<'_>) -> Option<EventResponse> {
        (self.0)(event)
    }
}

/// An event handler that delegates to multiple inner handlers.
///
/// Events are dispatched to all handlers in order. The first non-`None`
/// response is returned; later handlers still see the event.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with_if(args.verbose, TimingHandler::default())
///     .with_opt(approval_gate);
/// ```
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Add a handler to the chain. Handlers are called in registration order.
    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Add a handler only when `condition` is true.
    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }

    /// Add a handler from an `Option`. `None` is a no-op.
    pub fn with_opt(self, handler: Option<impl EventHandler + 'static>) -> Self {
        match handler {
            Some(h) => self.with(h),
            None => self,
        }
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &AgentEvent<'_>) -> Option<EventResponse> {
        let mut first = None;
        for handler in &self.handlers {
            let response = handler.on_event(event);
            if first.is_none() {
                first = response;
            }
        }
        first
    }
}

/// An event handler that logs events via `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &AgentEvent<'_>) -> Option<EventResponse> {
        match event {
            AgentEvent::IterationStart {
                iteration,
                max_iterations,
                context_usage,
            } => {
                info!(
                    "[iteration {iteration}/{max_iterations}] {}",
                    context_usage.to_log_string()
                );
            }
            AgentEvent::Text(text) => {
                let preview: String = text.chars().take(200).collect();
                debug!(
                    "LLM text: {preview}{}",
                    if text.chars().count() > 200 { "..." } else { "" }
                );
            }
            AgentEvent::ToolCallsReceived { iteration, count } => {
                debug!("{count} tool call(s) in iteration {iteration}");
            }
            AgentEvent::ToolExecuting { name, .. } => {
                debug!("Executing tool: {name}");
            }
            AgentEvent::ToolResult { name, result, .. } => {
                if result.is_error() {
                    warn!("Tool {name} failed: {}", result.text_content());
                } else {
                    debug!("Tool {name} result: {} bytes", result.text_content().len());
                }
            }
            AgentEvent::TokenUsage {
                prompt_tokens,
                completion_tokens,
            } => {
                debug!("Tokens: prompt={prompt_tokens}, completion={completion_tokens}");
            }
            AgentEvent::PrematureFinal { iteration, verdict } => {
                info!(
                    "Iteration {iteration}: final answer rejected ({} missing section(s), {} pending signal(s))",
                    verdict.missing_sections.len(),
                    verdict.pending_signals.len()
                );
            }
            AgentEvent::NoAction { iteration } => {
                debug!("Iteration {iteration}: no tool calls and no final answer");
            }
            AgentEvent::Compressed {
                trigger,
                before_tokens,
                after_tokens,
            } => {
                info!("Context compressed ({trigger:?}): {before_tokens} -> {after_tokens} tokens");
            }
            AgentEvent::CompressionDegraded { trigger, error } => {
                warn!("Context compression ({trigger:?}) degraded: {error}");
            }
            AgentEvent::Windowed { kept, total } => {
                debug!("Sliding window: sending {kept} of {total} messages");
            }
            AgentEvent::Finished { iteration } => {
                info!("Final answer accepted at iteration {iteration}");
            }
            AgentEvent::Exhausted { max_iterations } => {
                info!("Agent hit iteration limit ({max_iterations})");
            }
            AgentEvent::Failed { iteration, error: message } => {
                error!("Iteration {iteration} failed: {message}");
            }
            AgentEvent::Cancelled { iteration } => {
                info!("Cancelled after iteration {iteration}");
            }
        }
        None
    }
}
