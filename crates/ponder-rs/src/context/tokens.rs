//! Token estimation for messages and transcripts.
//!
//! Two counting modes share one structural cost model:
//!
//! - **Heuristic** (default): `ceil(chars / chars_per_token)` per text field,
//!   with `chars_per_token = 4.0` unless calibrated.
//! - **Tokenizer** (`hf-tokenizer` feature): exact counts from a HuggingFace
//!   `tokenizer.json`. A file that fails to load falls back to the heuristic
//!   with a warning.
//!
//! On top of content tokens every message pays a fixed overhead (role marker
//! and framing), and every list pays for reply priming. Estimates are
//! deterministic and monotonic: appending a message never lowers the total.

use crate::Message;
use std::fmt;
use std::path::Path;
use tracing::warn;

/// Default characters per token for the heuristic counter.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 4.0;

/// Framing tokens every message costs regardless of content.
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Tokens for the role marker.
pub const ROLE_TOKENS: usize = 1;

/// Extra tokens when a message carries a `name` field.
pub const NAME_TOKENS: usize = 1;

/// Tokens that prime the assistant reply, paid once per message list.
pub const REPLY_PRIMING_TOKENS: usize = 3;

enum Counter {
    Heuristic {
        chars_per_token: f64,
    },
    #[cfg(feature = "hf-tokenizer")]
    Tokenizer(Box<tokenizers::Tokenizer>),
}

/// Estimates token cost of messages.
pub struct TokenEstimator {
    counter: Counter,
}

impl fmt::Debug for TokenEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.counter {
            Counter::Heuristic { chars_per_token } => f
                .debug_struct("TokenEstimator")
                .field("mode", &"heuristic")
                .field("chars_per_token", chars_per_token)
                .finish(),
            #[cfg(feature = "hf-tokenizer")]
            Counter::Tokenizer(_) => f
                .debug_struct("TokenEstimator")
                .field("mode", &"tokenizer")
                .finish(),
        }
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::heuristic()
    }
}

impl TokenEstimator {
    /// Character-based estimator with the default ratio.
    pub fn heuristic() -> Self {
        Self::with_chars_per_token(DEFAULT_CHARS_PER_TOKEN)
    }

    /// Character-based estimator with a calibrated ratio. Non-finite or
    /// non-positive ratios fall back to the default.
    pub fn with_chars_per_token(chars_per_token: f64) -> Self {
        let chars_per_token = if chars_per_token.is_finite() && chars_per_token > 0.0 {
            chars_per_token
        } else {
            DEFAULT_CHARS_PER_TOKEN
        };
        Self {
            counter: Counter::Heuristic { chars_per_token },
        }
    }

    /// Exact counting from a HuggingFace `tokenizer.json`.
    #[cfg(feature = "hf-tokenizer")]
    pub fn from_tokenizer_file(path: &Path) -> Result<Self, String> {
        let tokenizer = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| format!("failed to load tokenizer '{}': {e}", path.display()))?;
        Ok(Self {
            counter: Counter::Tokenizer(Box::new(tokenizer)),
        })
    }

    /// Build the best available estimator: the tokenizer at `path` when one
    /// is given and loads, otherwise the heuristic with `chars_per_token`.
    pub fn load(path: Option<&Path>, chars_per_token: f64) -> Self {
        let Some(path) = path else {
            return Self::with_chars_per_token(chars_per_token);
        };

        #[cfg(feature = "hf-tokenizer")]
        {
            match Self::from_tokenizer_file(path) {
                Ok(estimator) => return estimator,
                Err(e) => warn!("{e}; falling back to character-based token estimation"),
            }
        }
        #[cfg(not(feature = "hf-tokenizer"))]
        warn!(
            "Tokenizer file '{}' ignored (built without the hf-tokenizer feature); \
             using character-based token estimation",
            path.display()
        );

        Self::with_chars_per_token(chars_per_token)
    }

    /// Whether counts come from a real tokenizer.
    pub fn is_precise(&self) -> bool {
        match self.counter {
            Counter::Heuristic { .. } => false,
            #[cfg(feature = "hf-tokenizer")]
            Counter::Tokenizer(_) => true,
        }
    }

    /// Token count of a bare string.
    pub fn count_text(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        match &self.counter {
            Counter::Heuristic { chars_per_token } => heuristic_count(text, *chars_per_token),
            #[cfg(feature = "hf-tokenizer")]
            Counter::Tokenizer(tokenizer) => match tokenizer.encode(text, false) {
                Ok(encoding) => encoding.len(),
                Err(e) => {
                    warn!("Tokenizer failed ({e}); estimating by characters");
                    heuristic_count(text, DEFAULT_CHARS_PER_TOKEN)
                }
            },
        }
    }

    /// Token cost of a single message, including framing.
    pub fn estimate_message(&self, message: &Message) -> usize {
        let mut tokens = MESSAGE_OVERHEAD_TOKENS + ROLE_TOKENS;

        if let Some(content) = message.content() {
            tokens += self.count_text(content);
        }
        if let Some(name) = message.name() {
            tokens += self.count_text(name) + NAME_TOKENS;
        }
        if let Some(call_id) = message.tool_call_id() {
            tokens += self.count_text(call_id);
        }
        let calls = message.tool_calls();
        if !calls.is_empty() {
            let serialized = serde_json::to_string(calls).unwrap_or_default();
            tokens += self.count_text(&serialized);
        }

        tokens
    }

    /// Token cost of a message list.
    pub fn estimate(&self, messages: &[Message]) -> usize {
        messages
            .iter()
            .map(|m| self.estimate_message(m))
            .sum::<usize>()
            + REPLY_PRIMING_TOKENS
    }

    /// Usage of a message list against a token limit.
    pub fn usage(&self, messages: &[Message], max_tokens: usize) -> ContextUsage {
        let estimated_tokens = self.estimate(messages);
        let usage_pct = if max_tokens > 0 {
            estimated_tokens as f64 / max_tokens as f64
        } else {
            1.0
        };
        ContextUsage {
            estimated_tokens,
            max_tokens,
            usage_pct,
        }
    }
}

fn heuristic_count(text: &str, chars_per_token: f64) -> usize {
    (text.chars().count() as f64 / chars_per_token).ceil() as usize
}

/// Snapshot of context window consumption.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextUsage {
    /// Estimated tokens consumed.
    pub estimated_tokens: usize,
    /// Token limit of the context window.
    pub max_tokens: usize,
    /// Usage as a fraction (0.0 to 1.0+).
    pub usage_pct: f64,
}

impl ContextUsage {
    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "context: ~{} tokens ({:.0}% of {})",
            self.estimated_tokens,
            self.usage_pct * 100.0,
            self.max_tokens,
        )
    }
}
