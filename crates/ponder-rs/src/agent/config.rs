//! Configuration for the [`Harness`](super::harness::Harness).
//!
//! # Examples
//!
//! Minimal configuration, everything else at defaults:
//!
//! ```ignore
//! let config = AgentConfig::new("gpt-4o");
//! ```
//!
//! Customized with builder methods:
//!
//! ```ignore
//! let config = AgentConfig::new("gpt-4o")
//!     .with_max_iterations(5)
//!     .with_temperature(0.2)
//!     .with_context(ContextConfig::default().with_max_messages(Some(40)));
//! ```

use crate::agent::judge::DEFAULT_FINALITY_MARKER;
use crate::agent::prompt::default_system_prompt;
use crate::context::ContextConfig;

/// Default cap on model calls per query.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Default sampling temperature for agent turns.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Configuration for one [`Harness`](super::harness::Harness).
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model identifier sent with every request.
    pub model: String,
    /// System prompt. `None` uses the built-in ReAct prompt for
    /// `finality_marker`.
    pub system_prompt: Option<String>,
    /// Text that marks a final answer.
    pub finality_marker: String,
    /// Model calls allowed before the run ends as exhausted.
    pub max_iterations: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens per response. `None` leaves it to the backend.
    pub max_tokens: Option<u32>,
    /// Context budget for each query.
    pub context: ContextConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: crate::DEFAULT_MODEL.to_string(),
            system_prompt: None,
            finality_marker: DEFAULT_FINALITY_MARKER.to_string(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: None,
            context: ContextConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Create a config for a model with every other setting at its default.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    // ── Builder methods ───────────────────────────────────────────

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_finality_marker(mut self, marker: impl Into<String>) -> Self {
        self.finality_marker = marker.into();
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_context(mut self, context: ContextConfig) -> Self {
        self.context = context;
        self
    }

    /// The system prompt in effect.
    pub fn resolved_system_prompt(&self) -> String {
        self.system_prompt
            .clone()
            .unwrap_or_else(|| default_system_prompt(&self.finality_marker))
    }

    /// Reject settings the loop cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("model must not be empty".into());
        }
        if self.finality_marker.trim().is_empty() {
            return Err("finality marker must not be empty".into());
        }
        if self.max_iterations == 0 {
            return Err("max_iterations must be at least 1".into());
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(format!("temperature must be in [0, 2], got {}", self.temperature));
        }
        self.context.validate()
    }
}
