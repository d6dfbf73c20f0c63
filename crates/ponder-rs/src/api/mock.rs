//! Deterministic, scripted model backend.
//!
//! [`ScriptedBackend`] replays a queue of prepared turns in order and records
//! every request it receives. It lets tests drive the agent loop through
//! exact scenarios and powers the `--mock` CLI demo without credentials.

use crate::ToolCall;
use crate::api::backend::{AssistantTurn, BackendError, BackendFuture, CompletionRequest, ModelBackend};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::debug;

/// Final answer used by the demo script.
pub const DEMO_FINAL_ANSWER: &str = "\
1. What have we learned?
The search returned three well-cited 2020 machine learning papers: \
\"Language Models are Few-Shot Learners\", \"An Image is Worth 16x16 Words\", \
and \"Denoising Diffusion Probabilistic Models\".

2. Do we need more information?
No. The titles, authors and years cover what the query asked for.

3. Are we ready for a Final Answer?
Yes, the results fully answer the query.

Final Answer: Three notable ML papers from 2020 are \"Language Models are \
Few-Shot Learners\" (Brown et al.), \"An Image is Worth 16x16 Words\" \
(Dosovitskiy et al.) and \"Denoising Diffusion Probabilistic Models\" (Ho et al.).";

/// A backend that answers from a script.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<AssistantTurn, String>>>,
    fallback: Option<AssistantTurn>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedBackend {
    /// Replay `turns` in order. Once they run out, every call fails unless a
    /// fallback was set.
    pub fn new(turns: impl IntoIterator<Item = AssistantTurn>) -> Self {
        Self {
            script: Mutex::new(turns.into_iter().map(Ok).collect()),
            ..Default::default()
        }
    }

    /// Append a turn to the script (builder pattern).
    pub fn then(self, turn: AssistantTurn) -> Self {
        self.lock_script().push_back(Ok(turn));
        self
    }

    /// Append a failing call to the script (builder pattern).
    pub fn then_fail(self, message: impl Into<String>) -> Self {
        self.lock_script().push_back(Err(message.into()));
        self
    }

    /// Answer with `turn` whenever the script is empty.
    pub fn with_fallback(mut self, turn: AssistantTurn) -> Self {
        self.fallback = Some(turn);
        self
    }

    /// The two-step paper-search demo: one `search_papers` call, then a
    /// fully reasoned final answer.
    pub fn demo() -> Self {
        let search = ToolCall::function(
            "call_search_papers_1",
            "search_papers",
            &json!({"query": "machine learning", "year": 2020, "limit": 3}),
        );
        Self::new([
            AssistantTurn {
                content: Some(
                    "Thought: I should search for machine learning papers published in 2020."
                        .into(),
                ),
                tool_calls: vec![search],
                usage: None,
            },
            AssistantTurn::text(DEMO_FINAL_ANSWER),
        ])
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of calls received so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<AssistantTurn, String>>> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_turn(&self, request: &CompletionRequest) -> Result<AssistantTurn, BackendError> {
        let call_number = {
            let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
            requests.push(request.clone());
            requests.len()
        };
        debug!(
            "Scripted backend call #{call_number} ({} messages)",
            request.messages.len()
        );

        match self.lock_script().pop_front() {
            Some(Ok(turn)) => Ok(turn),
            Some(Err(message)) => Err(BackendError::Script(message)),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| BackendError::Script(format!("no turn scripted for call #{call_number}"))),
        }
    }
}

impl ModelBackend for ScriptedBackend {
    fn complete<'a>(&'a self, request: &'a CompletionRequest) -> BackendFuture<'a> {
        let result = self.next_turn(request);
        Box::pin(async move { result })
    }
}
