//! Agent runtime: the [`Harness`] ReAct loop and its supporting modules.
//!
//! - [`harness::Harness`] — the iterative reason-act-observe loop. Start here.
//! - [`config::AgentConfig`] — model, iteration cap, sampling, and the
//!   context budget.
//! - [`judge`] — [`CompletionJudge`], which decides whether a claimed final
//!   answer is really final.
//! - [`prompt`] — the system prompt, query seed, reflection and corrective
//!   prompts.
//! - [`events`] — [`EventHandler`] trait and [`AgentEvent`] enum for
//!   observing the loop.
//! - [`result`] — [`LoopState`] and the per-query [`RunResult`].
//! - [`sink`] — [`TranscriptSink`] and the plain-text file sink.

pub mod config;
pub mod events;
pub mod harness;
pub mod judge;
pub mod prompt;
pub mod result;
pub mod sink;

// Re-export commonly used items at the module level.
pub use config::{AgentConfig, DEFAULT_MAX_ITERATIONS, DEFAULT_TEMPERATURE};
pub use events::{
    AgentEvent, CompositeEventHandler, EventHandler, EventResponse, FnEventHandler, LoggingHandler,
    NoopHandler,
};
pub use harness::{AgentError, Harness};
pub use judge::{CompletionJudge, DEFAULT_FINALITY_MARKER, Section, Verdict};
pub use prompt::SystemPromptBuilder;
pub use result::{LoopState, RunEntry, RunResult, ToolCallRecord};
pub use sink::{FileTranscriptSink, MemorySink, SinkError, TranscriptSink, render_transcript};
