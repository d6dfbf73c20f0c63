//! The transcript owner and its budget policy.
//!
//! [`ContextStore`] holds the ordered transcript for one query. Every append
//! goes through [`ContextStore::add_message`], which re-evaluates the budget
//! and returns the message list the next model call should see:
//!
//! 1. **Hard overflow** (estimate above `token_limit`): compress now,
//!    whatever the iteration.
//! 2. **Scheduled** (every `compression_interval` iterations, estimate above
//!    `token_limit * threshold_ratio`): compress.
//! 3. Otherwise the transcript is returned as is, or as a sliding-window view
//!    when it holds more than `max_messages` messages.
//!
//! Compression keeps the pinned system prompt and the latest user message
//! verbatim and replaces everything else with one summary produced by the
//! model backend. When the backend fails, the store degrades to just those
//! two messages and logs the error; it never fails the caller.
//!
//! All cutting happens on [`MessageGroup`](super::groups::MessageGroup)
//! boundaries, and budget checks wait while an assistant turn still has
//! unanswered tool calls, so tool results always travel with their call.

use crate::Message;
use crate::api::backend::{CompletionRequest, ModelBackend};
use crate::context::groups::{self, GroupKind, MessageGroup};
use crate::context::summarizer;
use crate::context::tokens::{ContextUsage, DEFAULT_CHARS_PER_TOKEN, TokenEstimator};
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

/// Default context window in tokens.
pub const DEFAULT_TOKEN_LIMIT: usize = 128_000;

/// Default fraction of the limit that arms scheduled compression.
pub const DEFAULT_THRESHOLD_RATIO: f64 = 0.8;

/// Default number of iterations between scheduled compression checks.
pub const DEFAULT_COMPRESSION_INTERVAL: u32 = 5;

// ── Configuration ─────────────────────────────────────────────────

/// Budget settings for a [`ContextStore`].
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Hard token limit of the model's context window.
    pub token_limit: usize,
    /// Fraction of `token_limit` above which scheduled compression fires.
    pub threshold_ratio: f64,
    /// Scheduled compression runs on iterations divisible by this.
    pub compression_interval: u32,
    /// Sliding-window cap on message count. `None` disables the window.
    pub max_messages: Option<usize>,
    /// Model for summarization calls. `None` uses the agent's model.
    pub summary_model: Option<String>,
    /// Sampling temperature for summarization calls.
    pub summary_temperature: f32,
    /// Maximum tokens for the summary response.
    pub max_summary_tokens: u32,
    /// Tokens held back from the summarization input for the prompt itself
    /// and the response.
    pub summary_reserve_tokens: usize,
    /// Heuristic characters-per-token ratio.
    pub chars_per_token: f64,
    /// HuggingFace `tokenizer.json` for exact counts (`hf-tokenizer` feature).
    pub tokenizer_path: Option<PathBuf>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_limit: DEFAULT_TOKEN_LIMIT,
            threshold_ratio: DEFAULT_THRESHOLD_RATIO,
            compression_interval: DEFAULT_COMPRESSION_INTERVAL,
            max_messages: None,
            summary_model: None,
            summary_temperature: 0.3,
            max_summary_tokens: 2048,
            summary_reserve_tokens: 1000,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            tokenizer_path: None,
        }
    }
}

impl ContextConfig {
    pub fn with_token_limit(mut self, limit: usize) -> Self {
        self.token_limit = limit;
        self
    }

    pub fn with_threshold_ratio(mut self, ratio: f64) -> Self {
        self.threshold_ratio = ratio;
        self
    }

    pub fn with_compression_interval(mut self, interval: u32) -> Self {
        self.compression_interval = interval;
        self
    }

    pub fn with_max_messages(mut self, max: Option<usize>) -> Self {
        self.max_messages = max;
        self
    }

    pub fn with_summary_model(mut self, model: impl Into<String>) -> Self {
        self.summary_model = Some(model.into());
        self
    }

    pub fn with_summary_reserve(mut self, tokens: usize) -> Self {
        self.summary_reserve_tokens = tokens;
        self
    }

    pub fn with_tokenizer(mut self, path: impl Into<PathBuf>) -> Self {
        self.tokenizer_path = Some(path.into());
        self
    }

    /// Token count above which scheduled compression fires.
    pub fn threshold_tokens(&self) -> usize {
        (self.token_limit as f64 * self.threshold_ratio) as usize
    }

    /// Reject settings the policy cannot work with.
    pub fn validate(&self) -> Result<(), String> {
        if self.token_limit == 0 {
            return Err("token_limit must be greater than zero".into());
        }
        if !(self.threshold_ratio > 0.0 && self.threshold_ratio <= 1.0) {
            return Err(format!(
                "threshold_ratio must be in (0, 1], got {}",
                self.threshold_ratio
            ));
        }
        if self.compression_interval == 0 {
            return Err("compression_interval must be at least 1".into());
        }
        if self.max_messages == Some(0) {
            return Err("max_messages must be at least 1 when set".into());
        }
        Ok(())
    }
}

// ── Budget actions ────────────────────────────────────────────────

/// Why a compression ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionTrigger {
    HardOverflow,
    Scheduled,
}

/// What the last [`ContextStore::add_message`] did to the transcript.
#[derive(Debug, Clone, PartialEq)]
pub enum BudgetAction {
    /// Nothing; the transcript was returned unchanged.
    Kept,
    /// Budget checks waited for outstanding tool results.
    Deferred { pending_calls: usize },
    /// A sliding-window view was returned; the transcript itself is intact.
    Windowed { kept: usize, total: usize },
    /// History was replaced by a model-written summary.
    Compressed {
        trigger: CompressionTrigger,
        before_tokens: usize,
        after_tokens: usize,
        summarized_messages: usize,
        dropped_messages: usize,
    },
    /// Compression could not summarize; only the system prompt and the
    /// latest user message were kept.
    Degraded {
        trigger: CompressionTrigger,
        error: String,
    },
}

// ── ContextStore ──────────────────────────────────────────────────

/// Owns the transcript of one query and keeps it within budget.
pub struct ContextStore<'a> {
    config: ContextConfig,
    model: String,
    backend: &'a dyn ModelBackend,
    estimator: TokenEstimator,
    transcript: Vec<Message>,
    last_action: BudgetAction,
    compressions: usize,
    degradations: usize,
}

impl std::fmt::Debug for ContextStore<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextStore")
            .field("config", &self.config)
            .field("model", &self.model)
            .field("messages", &self.transcript.len())
            .field("last_action", &self.last_action)
            .finish()
    }
}

impl<'a> ContextStore<'a> {
    /// Create an empty store. `model` is used for summarization unless the
    /// config names a dedicated summary model.
    pub fn new(config: ContextConfig, model: impl Into<String>, backend: &'a dyn ModelBackend) -> Self {
        let estimator = TokenEstimator::load(config.tokenizer_path.as_deref(), config.chars_per_token);
        let model = config.summary_model.clone().unwrap_or_else(|| model.into());
        Self {
            config,
            model,
            backend,
            estimator,
            transcript: Vec::new(),
            last_action: BudgetAction::Kept,
            compressions: 0,
            degradations: 0,
        }
    }

    /// Replace the token estimator (e.g. with a calibrated one).
    pub fn with_estimator(mut self, estimator: TokenEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    /// Append a message and return the list to send to the model next.
    ///
    /// A system message is pinned at the front. A later system message
    /// replaces the pinned one instead of appearing mid-transcript.
    pub async fn add_message(&mut self, message: Message, iteration: u32) -> Vec<Message> {
        if message.is_system() {
            if self.has_pinned_system() {
                warn!("Replacing the pinned system prompt");
                self.transcript[0] = message;
            } else {
                if !self.transcript.is_empty() {
                    warn!("System prompt added after other messages; pinning it first");
                }
                self.transcript.insert(0, message);
            }
        } else {
            self.transcript.push(message);
        }
        self.manage_budget(iteration).await
    }

    /// The full stored transcript (before any sliding-window view).
    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub fn len(&self) -> usize {
        self.transcript.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transcript.is_empty()
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    /// What the last `add_message` call did.
    pub fn last_action(&self) -> &BudgetAction {
        &self.last_action
    }

    /// Number of successful compressions.
    pub fn compressions(&self) -> usize {
        self.compressions
    }

    /// Number of compressions that fell back to the lossy minimum.
    pub fn degradations(&self) -> usize {
        self.degradations
    }

    /// Current usage of the stored transcript against the token limit.
    pub fn usage(&self) -> ContextUsage {
        self.estimator.usage(&self.transcript, self.config.token_limit)
    }

    fn has_pinned_system(&self) -> bool {
        self.transcript.first().is_some_and(Message::is_system)
    }

    async fn manage_budget(&mut self, iteration: u32) -> Vec<Message> {
        let pending = groups::pending_tool_calls(&self.transcript);
        if !pending.is_empty() {
            debug!(
                "Budget check deferred: {} tool result(s) outstanding",
                pending.len()
            );
            self.last_action = BudgetAction::Deferred {
                pending_calls: pending.len(),
            };
            return self.outgoing();
        }

        let estimated = self.estimator.estimate(&self.transcript);
        let trigger = if estimated > self.config.token_limit {
            Some(CompressionTrigger::HardOverflow)
        } else if iteration > 0
            && iteration % self.config.compression_interval.max(1) == 0
            && estimated > self.config.threshold_tokens()
        {
            Some(CompressionTrigger::Scheduled)
        } else {
            None
        };

        if let Some(trigger) = trigger {
            info!(
                "Compressing context at iteration {iteration} ({trigger:?}): ~{estimated} tokens, \
                 limit {}, threshold {}",
                self.config.token_limit,
                self.config.threshold_tokens()
            );
            self.compress(trigger, estimated).await;
            return self.outgoing();
        }

        if let Some(max) = self.config.max_messages
            && self.transcript.len() > max
        {
            let view = sliding_window(&self.transcript, max);
            debug!(
                "Sliding window: sending {} of {} messages",
                view.len(),
                self.transcript.len()
            );
            self.last_action = BudgetAction::Windowed {
                kept: view.len(),
                total: self.transcript.len(),
            };
            return view;
        }

        self.last_action = BudgetAction::Kept;
        self.outgoing()
    }

    /// The transcript as sent to the model: tool messages whose call is not
    /// in the list are left out.
    fn outgoing(&self) -> Vec<Message> {
        let messages = groups::drop_orphans(&self.transcript);
        if messages.len() < self.transcript.len() {
            warn!(
                "Leaving out {} tool message(s) without a matching call",
                self.transcript.len() - messages.len()
            );
        }
        messages
    }

    async fn compress(&mut self, trigger: CompressionTrigger, before_tokens: usize) {
        let pinned = self.has_pinned_system();
        let last_user = self.transcript.iter().rposition(Message::is_user);
        let all_groups = groups::partition(&self.transcript);

        let candidates: Vec<&MessageGroup> = all_groups
            .iter()
            .filter(|g| !(pinned && g.starts_at(0)))
            .filter(|g| last_user.is_none_or(|idx| !g.starts_at(idx)))
            .filter(|g| g.kind != GroupKind::OrphanTool)
            .collect();

        if candidates.is_empty() {
            debug!("Nothing to compress besides the pinned messages");
            self.last_action = BudgetAction::Kept;
            return;
        }

        let mut base = Vec::new();
        if pinned {
            base.push(self.transcript[0].clone());
        }
        let last_user_msg = last_user.map(|idx| self.transcript[idx].clone());

        let base_tokens = {
            let mut preserved = base.clone();
            preserved.extend(last_user_msg.iter().cloned());
            self.estimator.estimate(&preserved)
        };
        let available = self
            .config
            .token_limit
            .saturating_sub(base_tokens + self.config.summary_reserve_tokens);

        // Newest groups first, whole groups only.
        let mut selected: Vec<&MessageGroup> = Vec::new();
        let mut used = 0;
        for group in candidates.iter().rev() {
            let cost: usize = group
                .slice(&self.transcript)
                .iter()
                .map(|m| self.estimator.estimate_message(m))
                .sum();
            if used + cost > available {
                break;
            }
            used += cost;
            selected.push(group);
        }
        selected.reverse();

        let span: Vec<Message> = selected
            .iter()
            .flat_map(|g| g.slice(&self.transcript).iter().cloned())
            .collect();
        let candidate_messages: usize = candidates.iter().map(|g| g.len()).sum();
        let dropped_messages = candidate_messages - span.len();
        if dropped_messages > 0 {
            debug!("{dropped_messages} older message(s) do not fit the summarization budget");
        }

        let summary = if span.is_empty() {
            Err("no history fits the summarization budget".to_string())
        } else {
            self.summarize(&span).await
        };

        let mut rebuilt = base;
        match summary {
            Ok(text) => {
                let provenance = summarizer::tool_provenance(&span);
                rebuilt.push(summarizer::summary_message(&text, &provenance, &span));
                rebuilt.extend(last_user_msg);
                let after_tokens = self.estimator.estimate(&rebuilt);
                info!(
                    "Context compressed: ~{before_tokens} -> ~{after_tokens} tokens \
                     ({} message(s) summarized, {dropped_messages} dropped)",
                    span.len()
                );
                if after_tokens > self.config.token_limit {
                    warn!(
                        "Context still above the limit after compression (~{after_tokens} > {})",
                        self.config.token_limit
                    );
                }
                self.compressions += 1;
                self.last_action = BudgetAction::Compressed {
                    trigger,
                    before_tokens,
                    after_tokens,
                    summarized_messages: span.len(),
                    dropped_messages,
                };
            }
            Err(e) => {
                error!(
                    "Context compression failed: {e}. Keeping only the system prompt and the \
                     latest user message"
                );
                rebuilt.extend(last_user_msg);
                self.degradations += 1;
                self.last_action = BudgetAction::Degraded { trigger, error: e };
            }
        }

        self.transcript = rebuilt;
    }

    async fn summarize(&self, span: &[Message]) -> Result<String, String> {
        let request = CompletionRequest::text_only(
            self.model.clone(),
            summarizer::build_summarization_request(span),
            self.config.summary_temperature,
        )
        .with_max_tokens(self.config.max_summary_tokens);

        let turn = self
            .backend
            .complete(&request)
            .await
            .map_err(|e| e.to_string())?;
        match turn.content {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err("summarization returned no text".to_string()),
        }
    }
}

// ── Sliding window ────────────────────────────────────────────────

/// Keep the newest whole message groups that fit in `max_messages`, with the
/// pinned system message re-prepended.
///
/// Groups are taken newest first and scanning stops at the first group that
/// would exceed the cap. The newest group is always kept, even when it alone
/// is larger than the cap, so the model never receives an empty
/// conversation. Orphaned tool messages are dropped. Applying the window to
/// its own output returns the same list.
pub fn sliding_window(messages: &[Message], max_messages: usize) -> Vec<Message> {
    let (system, rest) = match messages.split_first() {
        Some((first, rest)) if first.is_system() => (Some(first), rest),
        _ => (None, messages),
    };
    let budget = max_messages.saturating_sub(usize::from(system.is_some()));

    let mut kept: Vec<&MessageGroup> = Vec::new();
    let mut count = 0;
    let all_groups = groups::partition(rest);
    for group in all_groups.iter().rev() {
        if group.kind == GroupKind::OrphanTool {
            continue;
        }
        if count + group.len() > budget && !kept.is_empty() {
            break;
        }
        count += group.len();
        kept.push(group);
    }
    kept.reverse();

    let mut window = Vec::with_capacity(count + 1);
    window.extend(system.cloned());
    for group in kept {
        window.extend(group.slice(rest).iter().cloned());
    }
    window
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolCall;
    use crate::api::backend::AssistantTurn;
    use crate::api::mock::ScriptedBackend;
    use crate::context::groups::is_valid_transcript;
    use crate::context::summarizer::SUMMARY_HEADING;
    use serde_json::json;

    fn summary_backend() -> ScriptedBackend {
        ScriptedBackend::default().with_fallback(AssistantTurn::text("Earlier work summarized."))
    }

    fn call(id: &str) -> ToolCall {
        ToolCall::function(id, "search", &json!({}))
    }

    #[tokio::test]
    async fn system_message_pinned_first() {
        let backend = summary_backend();
        let mut store = ContextStore::new(ContextConfig::default(), "m", &backend);
        store.add_message(Message::user("q"), 0).await;
        let msgs = store.add_message(Message::system("sys"), 0).await;
        assert!(msgs[0].is_system());
        assert_eq!(msgs.len(), 2);

        let msgs = store.add_message(Message::system("sys2"), 0).await;
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].content(), Some("sys2"));
    }

    #[tokio::test]
    async fn under_budget_is_kept() {
        let backend = summary_backend();
        let mut store = ContextStore::new(ContextConfig::default(), "m", &backend);
        store.add_message(Message::system("sys"), 0).await;
        let msgs = store.add_message(Message::user("hello"), 0).await;
        assert_eq!(msgs, store.transcript());
        assert_eq!(store.last_action(), &BudgetAction::Kept);
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn scheduled_compression_waits_for_interval() {
        let backend = summary_backend();
        let config = ContextConfig::default()
            .with_token_limit(1000)
            .with_summary_reserve(50);
        let mut store = ContextStore::new(config, "m", &backend);

        // ~824 tokens: above the 800 threshold, below the 1000 limit.
        store.add_message(Message::system("sys"), 0).await;
        store.add_message(Message::user("u".repeat(400)), 3).await;
        store.add_message(Message::assistant_text("a".repeat(2400)), 3).await;
        store.add_message(Message::user("v".repeat(400)), 3).await;
        assert_eq!(store.last_action(), &BudgetAction::Kept);
        assert_eq!(backend.call_count(), 0);

        let msgs = store.add_message(Message::user("next"), 5).await;
        assert!(matches!(
            store.last_action(),
            BudgetAction::Compressed {
                trigger: CompressionTrigger::Scheduled,
                summarized_messages: 3,
                ..
            }
        ));
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0].content(), Some("sys"));
        assert!(msgs[1].content().unwrap().starts_with(SUMMARY_HEADING));
        assert_eq!(msgs[2], Message::user("next"));
        assert_eq!(store.compressions(), 1);

        let request = &backend.requests()[0];
        assert!((request.temperature - 0.3).abs() < f32::EPSILON);
        assert!(request.tools.is_empty());
    }

    #[tokio::test]
    async fn hard_overflow_compresses_off_schedule() {
        let backend = summary_backend();
        let config = ContextConfig::default()
            .with_token_limit(200)
            .with_summary_reserve(10);
        let mut store = ContextStore::new(config, "m", &backend);

        store.add_message(Message::system("sys"), 0).await;
        store.add_message(Message::user("q"), 0).await;
        store.add_message(Message::assistant_text("a".repeat(400)), 1).await;
        assert_eq!(store.last_action(), &BudgetAction::Kept);

        let msgs = store.add_message(Message::assistant_text("b".repeat(400)), 1).await;
        match store.last_action() {
            BudgetAction::Compressed {
                trigger,
                summarized_messages,
                dropped_messages,
                ..
            } => {
                assert_eq!(*trigger, CompressionTrigger::HardOverflow);
                // Only the newest assistant turn fits the summarization budget.
                assert_eq!(*summarized_messages, 1);
                assert_eq!(*dropped_messages, 1);
            }
            other => panic!("expected compression, got {other:?}"),
        }
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[2], Message::user("q"));

        let request = &backend.requests()[0];
        let rendered = request.messages[1].content().unwrap();
        assert!(rendered.contains(&"b".repeat(400)));
        assert!(!rendered.contains(&"a".repeat(400)));
    }

    #[tokio::test]
    async fn open_tool_exchange_defers_compression() {
        let backend = summary_backend();
        let config = ContextConfig::default()
            .with_token_limit(200)
            .with_summary_reserve(10);
        let mut store = ContextStore::new(config, "m", &backend);

        store.add_message(Message::system("sys"), 0).await;
        store.add_message(Message::user("q"), 0).await;
        store.add_message(Message::assistant_text("a".repeat(400)), 1).await;
        store
            .add_message(
                Message::assistant_tool_calls(Some("t".repeat(280)), vec![call("c1")]),
                2,
            )
            .await;
        assert_eq!(
            store.last_action(),
            &BudgetAction::Deferred { pending_calls: 1 }
        );
        assert_eq!(backend.call_count(), 0);

        let msgs = store
            .add_message(Message::tool_result("c1", "search", "ok"), 2)
            .await;
        assert!(matches!(store.last_action(), BudgetAction::Compressed { .. }));
        assert!(is_valid_transcript(&msgs));
        assert_eq!(msgs.len(), 3);
        assert!(msgs[1].content().unwrap().contains("search [c1]"));
        assert_eq!(msgs[2], Message::user("q"));
    }

    #[tokio::test]
    async fn calls_without_ids_stay_grouped_until_all_answered() {
        let backend = ScriptedBackend::default().then_fail("backend down");
        let config = ContextConfig::default()
            .with_token_limit(200)
            .with_summary_reserve(10);
        let mut store = ContextStore::new(config, "m", &backend);

        store.add_message(Message::system("sys"), 0).await;
        store.add_message(Message::user("q"), 0).await;
        store
            .add_message(Message::assistant_tool_calls(None, vec![call(""), call("")]), 1)
            .await;
        store
            .add_message(Message::tool_result("", "search", "r".repeat(800)), 1)
            .await;
        assert_eq!(
            store.last_action(),
            &BudgetAction::Deferred { pending_calls: 1 }
        );
        assert_eq!(backend.call_count(), 0);

        let msgs = store.add_message(Message::tool_result("", "search", "ok"), 1).await;
        assert!(matches!(store.last_action(), BudgetAction::Degraded { .. }));
        assert!(is_valid_transcript(&msgs));

        let msgs = store.add_message(Message::user("reflect"), 1).await;
        assert!(is_valid_transcript(&msgs), "{msgs:?}");
        assert!(msgs.iter().all(|m| !m.is_tool()));
    }

    #[tokio::test]
    async fn stray_tool_message_is_not_sent() {
        let backend = summary_backend();
        let mut store = ContextStore::new(ContextConfig::default(), "m", &backend);
        store.add_message(Message::system("sys"), 0).await;
        store.add_message(Message::user("q"), 0).await;
        let msgs = store
            .add_message(Message::tool_result("ghost", "search", "late"), 1)
            .await;
        assert_eq!(msgs, vec![Message::system("sys"), Message::user("q")]);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn failed_summary_degrades_to_system_and_last_user() {
        let backend = ScriptedBackend::default().then_fail("backend down");
        let config = ContextConfig::default()
            .with_token_limit(200)
            .with_summary_reserve(10);
        let mut store = ContextStore::new(config, "m", &backend);

        store.add_message(Message::system("sys"), 0).await;
        store.add_message(Message::user("first"), 0).await;
        store.add_message(Message::assistant_text("a".repeat(300)), 1).await;
        store.add_message(Message::user("latest"), 1).await;
        let msgs = store.add_message(Message::assistant_text("b".repeat(400)), 1).await;

        assert_eq!(msgs, vec![Message::system("sys"), Message::user("latest")]);
        assert!(matches!(
            store.last_action(),
            BudgetAction::Degraded { error, .. } if error.contains("backend down")
        ));
        assert_eq!(store.degradations(), 1);
        assert_eq!(store.compressions(), 0);
    }

    #[tokio::test]
    async fn returned_lists_never_split_groups() {
        let backend = summary_backend();
        let config = ContextConfig::default()
            .with_token_limit(300)
            .with_compression_interval(2)
            .with_summary_reserve(5)
            .with_max_messages(Some(6));
        let mut store = ContextStore::new(config, "m", &backend);

        let mut outputs = vec![store.add_message(Message::system("sys"), 0).await];
        outputs.push(store.add_message(Message::user("find papers"), 0).await);
        for iteration in 1..=8u32 {
            let ids: Vec<String> = (0..(iteration % 3 + 1))
                .map(|n| format!("c{iteration}-{n}"))
                .collect();
            let calls = ids.iter().map(|id| call(id)).collect();
            outputs.push(
                store
                    .add_message(Message::assistant_tool_calls(Some("x".repeat(60)), calls), iteration)
                    .await,
            );
            for id in &ids {
                outputs.push(
                    store
                        .add_message(Message::tool_result(id, "search", "y".repeat(80)), iteration)
                        .await,
                );
            }
            outputs.push(
                store
                    .add_message(Message::user(format!("reflect {iteration}")), iteration)
                    .await,
            );
        }

        for msgs in &outputs {
            assert!(msgs[0].is_system());
            // Mid-exchange lists are only ever the raw transcript; everything
            // else must be a valid transcript.
            if groups::pending_tool_calls(msgs).is_empty() {
                assert!(is_valid_transcript(msgs), "invalid list: {msgs:#?}");
            }
        }
        assert!(store.compressions() > 0);
    }

    #[test]
    fn window_keeps_whole_groups_and_system() {
        let mut msgs = vec![Message::system("sys"), Message::user("q")];
        msgs.push(Message::assistant_tool_calls(None, vec![call("a"), call("b")]));
        msgs.push(Message::tool_result("a", "search", "1"));
        msgs.push(Message::tool_result("b", "search", "2"));
        msgs.push(Message::user("reflect"));

        // Budget of 3 non-system slots: the 3-message exchange would exceed
        // it after "reflect", so only "reflect" survives.
        let window = sliding_window(&msgs, 4);
        assert_eq!(window, vec![Message::system("sys"), Message::user("reflect")]);

        let window = sliding_window(&msgs, 5);
        assert_eq!(window.len(), 5);
        assert!(window[1].tool_calls().len() == 2);
        assert!(is_valid_transcript(&window));
    }

    #[test]
    fn window_is_idempotent() {
        let mut msgs = vec![Message::system("sys")];
        for i in 0..6 {
            msgs.push(Message::user(format!("q{i}")));
            msgs.push(Message::assistant_tool_calls(None, vec![call(&format!("c{i}"))]));
            msgs.push(Message::tool_result(format!("c{i}"), "search", "r"));
        }
        for max in 1..20 {
            let once = sliding_window(&msgs, max);
            let twice = sliding_window(&once, max);
            assert_eq!(once, twice, "max={max}");
            assert!(is_valid_transcript(&once));
        }
    }

    #[test]
    fn window_keeps_oversized_newest_group() {
        let msgs = vec![
            Message::system("sys"),
            Message::assistant_tool_calls(None, vec![call("a"), call("b"), call("c")]),
            Message::tool_result("a", "search", "1"),
            Message::tool_result("b", "search", "2"),
            Message::tool_result("c", "search", "3"),
        ];
        let window = sliding_window(&msgs, 2);
        assert_eq!(window.len(), 5);
    }

    #[tokio::test]
    async fn window_is_a_view_over_the_transcript() {
        let backend = summary_backend();
        let config = ContextConfig::default().with_max_messages(Some(3));
        let mut store = ContextStore::new(config, "m", &backend);
        store.add_message(Message::system("sys"), 0).await;
        for i in 0..5 {
            store.add_message(Message::user(format!("u{i}")), 1).await;
        }
        let msgs = store.add_message(Message::user("u5"), 1).await;
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[2], Message::user("u5"));
        assert_eq!(store.transcript().len(), 7);
        assert_eq!(
            store.last_action(),
            &BudgetAction::Windowed { kept: 3, total: 7 }
        );
    }

    #[test]
    fn config_validation() {
        assert!(ContextConfig::default().validate().is_ok());
        assert!(ContextConfig::default().with_threshold_ratio(1.5).validate().is_err());
        assert!(ContextConfig::default().with_threshold_ratio(0.0).validate().is_err());
        assert!(ContextConfig::default().with_compression_interval(0).validate().is_err());
        assert!(ContextConfig::default().with_token_limit(0).validate().is_err());
        assert!(ContextConfig::default().with_max_messages(Some(0)).validate().is_err());
        assert_eq!(ContextConfig::default().with_token_limit(1000).threshold_tokens(), 800);
    }
}
