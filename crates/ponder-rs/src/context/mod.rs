//! Context window management: estimation, grouping, and compression.
//!
//! The transcript grows by at least two messages per iteration, so every
//! append goes through a [`ContextStore`] that keeps it within budget:
//!
//! 1. **[`tokens`]** — [`TokenEstimator`] prices messages with a
//!    characters-per-token heuristic, or exactly with a HuggingFace tokenizer
//!    behind the `hf-tokenizer` feature.
//!
//! 2. **[`groups`]** — splits a transcript into [`MessageGroup`]s. A tool
//!    call and its results form one group and are never separated.
//!
//! 3. **[`summarizer`]** — builds the compression prompt and the summary
//!    message that replaces a compressed span, with tool provenance.
//!
//! 4. **[`store`]** — the policy: hard overflow and scheduled compression,
//!    an optional sliding window, and graceful degradation when the
//!    summarization call fails.

pub mod groups;
pub mod store;
pub mod summarizer;
pub mod tokens;

// Re-export commonly used items at the module level.
pub use groups::{GroupKind, MessageGroup};
pub use store::{BudgetAction, CompressionTrigger, ContextConfig, ContextStore, sliding_window};
pub use tokens::{ContextUsage, DEFAULT_CHARS_PER_TOKEN, TokenEstimator};
