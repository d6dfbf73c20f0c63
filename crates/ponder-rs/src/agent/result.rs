//! Loop states and the per-query [`RunResult`].

use crate::MessageRole;
use crate::tools::ToolOutcome;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ── Loop state ────────────────────────────────────────────────────

/// Where the agent loop is. The last four are terminal.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    /// Calling the model for this iteration.
    Running(u32),
    /// Running the tool calls of the current assistant turn.
    AwaitingTools,
    Final,
    Exhausted,
    Failed,
    Cancelled,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoopState::Final | LoopState::Exhausted | LoopState::Failed | LoopState::Cancelled
        )
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Running(iteration) => write!(f, "running (iteration {iteration})"),
            LoopState::AwaitingTools => write!(f, "awaiting tools"),
            LoopState::Final => write!(f, "final"),
            LoopState::Exhausted => write!(f, "exhausted"),
            LoopState::Failed => write!(f, "failed"),
            LoopState::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ── Entries ───────────────────────────────────────────────────────

/// One executed tool call.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolCallRecord {
    pub tool_call_id: String,
    pub tool_name: String,
    pub tool_args: Value,
    pub tool_result: ToolOutcome,
}

/// What one iteration produced.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunEntry {
    pub iteration: u32,
    pub role: MessageRole,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRecord>>,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunEntry {
    /// An assistant turn.
    pub fn assistant(iteration: u32, content: Option<String>) -> Self {
        Self {
            iteration,
            role: MessageRole::Assistant,
            content,
            tool_calls: None,
            is_final: false,
            error: None,
        }
    }

    /// An iteration that ended in a backend failure.
    pub fn failure(iteration: u32, error: impl fmt::Display) -> Self {
        Self {
            error: Some(format!("Error in iteration {iteration}: {error}")),
            ..Self::assistant(iteration, None)
        }
    }
}

// ── Run result ────────────────────────────────────────────────────

/// Everything one query produced, handed to the transcript sink.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunResult {
    pub query: String,
    pub started_at: DateTime<Local>,
    pub state: LoopState,
    pub entries: Vec<RunEntry>,
}

impl RunResult {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            started_at: Local::now(),
            state: LoopState::Running(0),
            entries: Vec::new(),
        }
    }

    /// The accepted final answer text, if the query finished.
    pub fn final_answer(&self) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.is_final)
            .and_then(|e| e.content.as_deref())
    }

    /// Number of iterations that produced an entry.
    pub fn iterations(&self) -> u32 {
        self.entries.last().map_or(0, |e| e.iteration)
    }

    /// Number of tool calls across all entries.
    pub fn tool_call_count(&self) -> usize {
        self.entries
            .iter()
            .filter_map(|e| e.tool_calls.as_ref())
            .map(Vec::len)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn terminal_states() {
        assert!(!LoopState::Running(3).is_terminal());
        assert!(!LoopState::AwaitingTools.is_terminal());
        assert!(LoopState::Exhausted.is_terminal());
        assert_eq!(LoopState::Running(2).to_string(), "running (iteration 2)");
    }

    #[test]
    fn final_answer_and_counts() {
        let mut result = RunResult::new("q");
        let mut first = RunEntry::assistant(1, None);
        first.tool_calls = Some(vec![ToolCallRecord {
            tool_call_id: "c1".into(),
            tool_name: "search_papers".into(),
            tool_args: json!({"query": "x"}),
            tool_result: ToolOutcome::text("[]"),
        }]);
        result.entries.push(first);
        assert_eq!(result.final_answer(), None);

        let mut last = RunEntry::assistant(2, Some("Final Answer: done".into()));
        last.is_final = true;
        result.entries.push(last);
        assert_eq!(result.final_answer(), Some("Final Answer: done"));
        assert_eq!(result.iterations(), 2);
        assert_eq!(result.tool_call_count(), 1);
    }

    #[test]
    fn entry_serialization_skips_empty_fields() {
        let entry = RunEntry::failure(3, "HTTP 500: boom");
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["error"], "Error in iteration 3: HTTP 500: boom");
        assert!(value.get("tool_calls").is_none());
    }
}
