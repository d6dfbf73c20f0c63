//! Model side of the agent: the backend trait and its implementations.
//!
//! - [`backend`] — the [`ModelBackend`] trait the
//!   [`Harness`](crate::agent::harness::Harness) and the
//!   [`ContextStore`](crate::context::ContextStore) call, plus its request and
//!   response types. [`ChatClient`](crate::ChatClient) implements it for
//!   OpenAI-compatible and Azure endpoints.
//! - [`retry`] — transient error detection (429, 5xx, network failures) with
//!   configurable exponential backoff and jitter. Opt-in on the client.
//! - [`mock`] — [`ScriptedBackend`], a deterministic backend that replays
//!   queued turns. Used by tests and the `--mock` demo.

pub mod backend;
pub mod mock;
pub mod retry;

// Re-export commonly used items at the module level.
pub use backend::{AssistantTurn, BackendError, CompletionRequest, ModelBackend};
pub use mock::ScriptedBackend;
pub use retry::RetryConfig;
