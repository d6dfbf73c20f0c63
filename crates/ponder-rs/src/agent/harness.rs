//! Agent harness: the ReAct loop on top of a [`ModelBackend`] and a
//! [`ToolGateway`].
//!
//! The [`Harness`] seeds a fresh [`ContextStore`] with the system prompt and
//! the query, then repeats: call the model with the managed message list,
//! run any requested tool calls through the gateway, and feed the results
//! back with a reflection prompt. A query ends in one of four states:
//!
//! - **Final** — the model wrote the finality marker and the
//!   [`CompletionJudge`] accepted the turn.
//! - **Exhausted** — `max_iterations` model calls without an accepted answer.
//! - **Failed** — the backend returned an error.
//! - **Cancelled** — the stop signal fired between iterations.
//!
//! Every outcome is recorded in a [`RunResult`] and handed to the transcript
//! sink, if one is attached. Only a failure to list tools is an `Err`.

use super::config::AgentConfig;
use super::events::{AgentEvent, EventHandler, EventResponse, NoopHandler};
use super::judge::CompletionJudge;
use super::prompt;
use super::result::{LoopState, RunEntry, RunResult, ToolCallRecord};
use super::sink::TranscriptSink;
use crate::api::{AssistantTurn, CompletionRequest, ModelBackend};
use crate::context::{BudgetAction, ContextStore};
use crate::tools::{GatewayError, ToolGateway, ToolOutcome, tool_defs};
use crate::{Message, ToolCall, ToolChoice, ToolDef};
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that keep a query from starting.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

// ── Harness ────────────────────────────────────────────────────────

/// The ReAct loop.
///
/// ```ignore
/// let backend = ChatClient::openai(api_key)?;
/// let tools = ToolSet::new().with(search_papers_tool());
/// let sink = FileTranscriptSink::new("outputs");
///
/// let result = Harness::new(&backend, &tools, AgentConfig::new("gpt-4o"))
///     .with_sink(&sink)
///     .run("find ML papers from 2020")
///     .await?;
///
/// println!("{}", result.final_answer().unwrap_or("(no answer)"));
/// ```
///
/// # Lifetimes
///
/// `Harness<'a>` borrows the backend, gateway, event handler and sink. Bind
/// them to `let` bindings before building the harness so they outlive
/// `.run()`.
pub struct Harness<'a> {
    backend: &'a dyn ModelBackend,
    gateway: &'a dyn ToolGateway,
    config: AgentConfig,
    judge: CompletionJudge,
    event_handler: &'a dyn EventHandler,
    sink: Option<&'a dyn TranscriptSink>,
    /// Checked before each iteration. If it returns `true`, the query ends
    /// as cancelled.
    stop_signal: Option<Box<dyn Fn() -> bool + Send + Sync + 'a>>,
}

impl<'a> Harness<'a> {
    /// Create a harness. The judge uses the config's finality marker.
    pub fn new(backend: &'a dyn ModelBackend, gateway: &'a dyn ToolGateway, config: AgentConfig) -> Self {
        let judge = CompletionJudge::new(config.finality_marker.clone());
        Self {
            backend,
            gateway,
            config,
            judge,
            event_handler: &NoopHandler,
            sink: None,
            stop_signal: None,
        }
    }

    /// Attach an event handler.
    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.event_handler = handler;
        self
    }

    /// Attach a transcript sink. Every finished query is recorded, whatever
    /// its outcome. Sink errors are logged, not returned.
    pub fn with_sink(mut self, sink: &'a dyn TranscriptSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Attach a stop signal. The closure is called before each iteration.
    pub fn with_stop_signal(mut self, signal: impl Fn() -> bool + Send + Sync + 'a) -> Self {
        self.stop_signal = Some(Box::new(signal));
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Answer one query with a fresh context.
    ///
    /// Returns `Err` only when the configuration is invalid or the gateway
    /// cannot list its tools; every other failure is a terminal state in
    /// the returned [`RunResult`].
    pub async fn run(&self, query: &str) -> Result<RunResult, AgentError> {
        self.config.validate().map_err(AgentError::Config)?;

        let listing = self.gateway.list_tools().await?;
        let tools = tool_defs(&listing);
        let known: HashSet<&str> = tools.iter().map(|t| t.function.name.as_str()).collect();
        info!(
            "Query started: model={}, {} tool(s): {}",
            self.config.model,
            tools.len(),
            tools
                .iter()
                .map(|t| t.function.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut store = ContextStore::new(self.config.context.clone(), &self.config.model, self.backend);
        let mut result = RunResult::new(query);

        self.append(&mut store, Message::system(self.config.resolved_system_prompt()), 0)
            .await;
        let mut view = self
            .append(&mut store, Message::user(prompt::user_seed(query)), 0)
            .await;

        let mut iteration: u32 = 0;
        loop {
            if let Some(ref signal) = self.stop_signal
                && signal()
            {
                info!("Stop signal received, ending agent loop");
                result.state = LoopState::Cancelled;
                self.event_handler.on_event(&AgentEvent::Cancelled { iteration });
                break;
            }

            iteration += 1;
            if iteration > self.config.max_iterations {
                result.state = LoopState::Exhausted;
                self.event_handler.on_event(&AgentEvent::Exhausted {
                    max_iterations: self.config.max_iterations,
                });
                break;
            }
            result.state = LoopState::Running(iteration);

            let usage = store.usage();
            if let Some(EventResponse::InjectMessage(text)) =
                self.event_handler.on_event(&AgentEvent::IterationStart {
                    iteration,
                    max_iterations: self.config.max_iterations,
                    context_usage: &usage,
                })
            {
                view = self.append(&mut store, Message::user(text), iteration).await;
            }

            let request = self.request(view.clone(), &tools);
            let mut turn = match self.backend.complete(&request).await {
                Ok(turn) => turn,
                Err(e) => {
                    let message = e.to_string();
                    self.event_handler.on_event(&AgentEvent::Failed {
                        iteration,
                        error: &message,
                    });
                    result.entries.push(RunEntry::failure(iteration, &message));
                    result.state = LoopState::Failed;
                    break;
                }
            };
            normalize_call_ids(&mut turn.tool_calls, iteration);
            self.report_turn(&turn);

            let text = turn.content.as_deref().map(str::trim).filter(|t| !t.is_empty());

            // ── Final answer claimed ──
            if let Some(text) = text
                && self.judge.has_marker(text)
            {
                let verdict = self.judge.evaluate(text);
                if !turn.tool_calls.is_empty() {
                    debug!(
                        "Dropping {} tool call(s) sent alongside a final answer",
                        turn.tool_calls.len()
                    );
                }
                let mut entry = RunEntry::assistant(iteration, Some(text.to_string()));
                self.append(&mut store, Message::assistant_text(text), iteration).await;

                if verdict.is_accepted() {
                    entry.is_final = true;
                    result.entries.push(entry);
                    result.state = LoopState::Final;
                    self.event_handler.on_event(&AgentEvent::Finished { iteration });
                    break;
                }

                self.event_handler.on_event(&AgentEvent::PrematureFinal {
                    iteration,
                    verdict: &verdict,
                });
                result.entries.push(entry);
                let correction = prompt::premature_final_prompt(&verdict, self.judge.marker());
                view = self.append(&mut store, Message::user(correction), iteration).await;
                continue;
            }

            // ── Tool calls ──
            if !turn.tool_calls.is_empty() {
                result.state = LoopState::AwaitingTools;
                self.event_handler.on_event(&AgentEvent::ToolCallsReceived {
                    iteration,
                    count: turn.tool_calls.len(),
                });
                self.append(&mut store, turn.to_message(), iteration).await;

                let mut records = Vec::with_capacity(turn.tool_calls.len());
                let mut observations = Vec::with_capacity(turn.tool_calls.len());
                for call in &turn.tool_calls {
                    let record = self.execute_call(call, &known).await;
                    let payload = record.tool_result.to_json_string();
                    self.append(
                        &mut store,
                        Message::tool_result(&call.id, call.name(), payload.clone()),
                        iteration,
                    )
                    .await;
                    observations.push((call.name().to_string(), payload));
                    records.push(record);
                }

                let mut entry = RunEntry::assistant(iteration, text.map(str::to_string));
                entry.tool_calls = Some(records);
                result.entries.push(entry);

                let reflection = prompt::reflection_prompt(&observations);
                view = self.append(&mut store, Message::user(reflection), iteration).await;
                result.state = LoopState::Running(iteration);
                continue;
            }

            // ── Neither acted nor concluded ──
            self.event_handler.on_event(&AgentEvent::NoAction { iteration });
            result
                .entries
                .push(RunEntry::assistant(iteration, text.map(str::to_string)));
            self.append(&mut store, Message::assistant_text(text.unwrap_or_default()), iteration)
                .await;
            let nudge = prompt::continue_prompt(self.judge.marker());
            view = self.append(&mut store, Message::user(nudge), iteration).await;
        }

        info!(
            "Query ended: {} after {} iteration(s), {} compression(s), {} degraded",
            result.state,
            result.iterations(),
            store.compressions(),
            store.degradations()
        );

        if let Some(sink) = self.sink
            && let Err(e) = sink.record(&result)
        {
            warn!("Failed to record transcript: {e}");
        }

        Ok(result)
    }

    fn request(&self, messages: Vec<Message>, tools: &[ToolDef]) -> CompletionRequest {
        CompletionRequest {
            model: self.config.model.clone(),
            messages,
            tools: tools.to_vec(),
            tool_choice: ToolChoice::Auto,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        }
    }

    fn report_turn(&self, turn: &AssistantTurn) {
        if let Some(usage) = &turn.usage {
            self.event_handler.on_event(&AgentEvent::TokenUsage {
                prompt_tokens: usage.prompt_tokens.unwrap_or(0),
                completion_tokens: usage.completion_tokens.unwrap_or(0),
            });
        }
        if let Some(text) = turn.content.as_deref().filter(|t| !t.trim().is_empty()) {
            self.event_handler.on_event(&AgentEvent::Text(text));
        }
    }

    /// Run one tool call. Every failure becomes an error observation.
    async fn execute_call(&self, call: &ToolCall, known: &HashSet<&str>) -> ToolCallRecord {
        let name = call.name();
        let (tool_args, tool_result) = match call.arguments() {
            Err(e) => (
                Value::String(call.function.arguments.clone()),
                ToolOutcome::error(format!("Invalid JSON arguments for tool {name}: {e}")),
            ),
            Ok(args) if !known.contains(name) => {
                warn!("Model called unknown tool {name}");
                (args, ToolOutcome::error(format!("Tool {name} not found")))
            }
            Ok(args) => {
                let outcome = match self.event_handler.on_event(&AgentEvent::ToolExecuting {
                    name,
                    arguments: &args,
                }) {
                    Some(EventResponse::Deny(reason)) => {
                        info!("Tool {name} denied: {reason}");
                        ToolOutcome::error(format!("Tool call denied: {reason}"))
                    }
                    _ => match self.gateway.call_tool(name, &args).await {
                        Ok(outcome) => outcome,
                        Err(e) => ToolOutcome::error(format!("Error calling tool {name}: {e}")),
                    },
                };
                (args, outcome)
            }
        };

        self.event_handler.on_event(&AgentEvent::ToolResult {
            name,
            call_id: &call.id,
            result: &tool_result,
        });

        ToolCallRecord {
            tool_call_id: call.id.clone(),
            tool_name: name.to_string(),
            tool_args,
            tool_result,
        }
    }

    /// Append through the context store and report what its budget policy did.
    async fn append(&self, store: &mut ContextStore<'_>, message: Message, iteration: u32) -> Vec<Message> {
        let view = store.add_message(message, iteration).await;
        match store.last_action() {
            BudgetAction::Compressed {
                trigger,
                before_tokens,
                after_tokens,
                ..
            } => {
                self.event_handler.on_event(&AgentEvent::Compressed {
                    trigger: *trigger,
                    before_tokens: *before_tokens,
                    after_tokens: *after_tokens,
                });
            }
            BudgetAction::Degraded { trigger, error } => {
                self.event_handler.on_event(&AgentEvent::CompressionDegraded {
                    trigger: *trigger,
                    error,
                });
            }
            BudgetAction::Windowed { kept, total } => {
                self.event_handler
                    .on_event(&AgentEvent::Windowed { kept: *kept, total: *total });
            }
            BudgetAction::Kept | BudgetAction::Deferred { .. } => {}
        }
        view
    }
}

/// Give every call of a turn a distinct, non-empty id so each tool result
/// pairs with exactly one call. Well-formed ids are left alone.
fn normalize_call_ids(calls: &mut [ToolCall], iteration: u32) {
    let mut seen = HashSet::new();
    for (n, call) in calls.iter_mut().enumerate() {
        if call.id.trim().is_empty() || !seen.insert(call.id.clone()) {
            let fresh = format!("call_{iteration}_{}", n + 1);
            debug!("Renaming tool call id {:?} to {fresh}", call.id);
            call.id = fresh;
            seen.insert(call.id.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::events::FnEventHandler;
    use crate::agent::sink::MemorySink;
    use crate::api::ScriptedBackend;
    use crate::api::mock::DEMO_FINAL_ANSWER;
    use crate::context::ContextConfig;
    use crate::tools::{GatewayFuture, ToolEntry, ToolSet, ToolSpec, search_papers_tool};
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// In-memory gateway: one `search_papers` tool with a canned answer.
    struct PaperGateway {
        answer: ToolOutcome,
        calls: Mutex<Vec<(String, Value)>>,
    }

    impl PaperGateway {
        fn new(answer: ToolOutcome) -> Self {
            Self {
                answer,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl ToolGateway for PaperGateway {
        fn list_tools(&self) -> GatewayFuture<'_, Vec<ToolEntry>> {
            Box::pin(async {
                Ok(vec![
                    ToolEntry::Tool(ToolSpec {
                        name: "search_papers".into(),
                        description: "Search papers".into(),
                        input_schema: json!({"properties": {"query": {"type": "string"}}}),
                    }),
                    ToolEntry::Resource {
                        uri: "papers://all".into(),
                        name: "all".into(),
                    },
                ])
            })
        }

        fn call_tool<'a>(&'a self, name: &'a str, arguments: &'a Value) -> GatewayFuture<'a, ToolOutcome> {
            self.calls
                .lock()
                .unwrap()
                .push((name.to_string(), arguments.clone()));
            let answer = self.answer.clone();
            Box::pin(async move { Ok(answer) })
        }
    }

    struct DownGateway;

    impl ToolGateway for DownGateway {
        fn list_tools(&self) -> GatewayFuture<'_, Vec<ToolEntry>> {
            Box::pin(async { Err(GatewayError::Connection("connection refused".into())) })
        }

        fn call_tool<'a>(&'a self, _name: &'a str, _arguments: &'a Value) -> GatewayFuture<'a, ToolOutcome> {
            Box::pin(async { Err(GatewayError::Call("unreachable".into())) })
        }
    }

    fn three_papers() -> ToolOutcome {
        ToolOutcome::text(
            json!([
                {"title": "Language Models are Few-Shot Learners", "year": 2020},
                {"title": "An Image is Worth 16x16 Words", "year": 2020},
                {"title": "Denoising Diffusion Probabilistic Models", "year": 2020}
            ])
            .to_string(),
        )
    }

    fn search_call(args: Value) -> AssistantTurn {
        AssistantTurn::tool_calls(vec![ToolCall::function("call_1", "search_papers", &args)])
    }

    fn config() -> AgentConfig {
        AgentConfig::new("test-model")
    }

    #[tokio::test]
    async fn final_after_one_search() {
        let backend = ScriptedBackend::new([
            search_call(json!({"query": "ML papers", "limit": 3})),
            AssistantTurn::text(DEMO_FINAL_ANSWER),
        ]);
        let gateway = PaperGateway::new(three_papers());
        let sink = MemorySink::new();

        let result = Harness::new(&backend, &gateway, config())
            .with_sink(&sink)
            .run("find ML papers from 2020")
            .await
            .unwrap();

        assert_eq!(result.state, LoopState::Final);
        assert_eq!(result.entries.len(), 2);
        assert!(result.entries[1].is_final);
        assert!(!result.entries[0].is_final);
        assert!(result.final_answer().unwrap().contains("Final Answer:"));

        let record = &result.entries[0].tool_calls.as_ref().unwrap()[0];
        assert_eq!(record.tool_name, "search_papers");
        assert_eq!(record.tool_args, json!({"query": "ML papers", "limit": 3}));
        assert_eq!(record.tool_result, three_papers());

        let calls = gateway.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1["limit"], 3);

        let requests = backend.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].tool_choice, ToolChoice::Auto);
        assert_eq!(requests[0].tools.len(), 1);
        assert_eq!(requests[0].tools[0].function.parameters["type"], "object");
        assert_eq!(
            requests[0].messages[1].content(),
            Some("Query: find ML papers from 2020\n\nLet's approach this step-by-step:")
        );

        // system, seed, assistant(tool_calls), tool, reflection
        let second = &requests[1].messages;
        assert_eq!(second.len(), 5);
        assert!(second[0].is_system());
        assert_eq!(second[2].tool_calls().len(), 1);
        assert!(second[3].is_tool());
        assert_eq!(second[3].tool_call_id(), Some("call_1"));
        let reflection = second[4].content().unwrap();
        assert!(reflection.starts_with("Based on the tool results:\nTool 'search_papers' returned: {"));
        assert!(reflection.contains("3. Are we ready for a Final Answer?"));

        assert_eq!(sink.results().len(), 1);
        assert_eq!(sink.results()[0].state, LoopState::Final);
    }

    #[tokio::test]
    async fn exhausted_when_model_never_acts() {
        let backend = ScriptedBackend::default().with_fallback(AssistantTurn::text("Hmm, thinking."));
        let gateway = PaperGateway::new(three_papers());

        let result = Harness::new(&backend, &gateway, config().with_max_iterations(2))
            .run("find ML papers from 2020")
            .await
            .unwrap();

        assert_eq!(result.state, LoopState::Exhausted);
        assert_eq!(result.entries.len(), 2);
        assert!(result.entries.iter().all(|e| !e.is_final));
        assert_eq!(backend.call_count(), 2);

        let last = backend.requests()[1].messages.last().unwrap().clone();
        assert!(last.content().unwrap().starts_with("You haven't used any tools"));
    }

    #[tokio::test]
    async fn tool_error_payload_is_kept_verbatim() {
        let backend = ScriptedBackend::new([
            search_call(json!({"query": "ML papers"})),
            AssistantTurn::text(DEMO_FINAL_ANSWER),
        ]);
        let gateway = PaperGateway::new(ToolOutcome::error("tool not found"));

        let result = Harness::new(&backend, &gateway, config())
            .run("find ML papers from 2020")
            .await
            .unwrap();

        let record = &result.entries[0].tool_calls.as_ref().unwrap()[0];
        assert_eq!(record.tool_result.to_json_string(), r#"{"error":"tool not found"}"#);

        let second = &backend.requests()[1].messages;
        assert_eq!(second[3].content(), Some(r#"{"error":"tool not found"}"#));
        assert!(
            second[4]
                .content()
                .unwrap()
                .contains(r#"Tool 'search_papers' returned: {"error":"tool not found"}"#)
        );
        assert_eq!(result.state, LoopState::Final);
    }

    #[tokio::test]
    async fn unknown_tool_and_bad_arguments_become_observations() {
        let bad_args = ToolCall {
            function: crate::FunctionCallData {
                name: "search_papers".into(),
                arguments: "{not json".into(),
            },
            ..ToolCall::function("call_b", "search_papers", &json!({}))
        };
        let backend = ScriptedBackend::new([
            AssistantTurn::tool_calls(vec![
                ToolCall::function("call_a", "get_paper", &json!({"id": 1})),
                bad_args,
            ]),
            AssistantTurn::text(DEMO_FINAL_ANSWER),
        ]);
        let gateway = PaperGateway::new(three_papers());

        let result = Harness::new(&backend, &gateway, config()).run("q").await.unwrap();

        let records = result.entries[0].tool_calls.as_ref().unwrap();
        assert_eq!(records[0].tool_result, ToolOutcome::error("Tool get_paper not found"));
        assert!(records[1].tool_result.text_content().starts_with("Invalid JSON arguments"));
        assert_eq!(records[1].tool_args, json!("{not json"));
        assert!(gateway.calls.lock().unwrap().is_empty());

        // Tool messages follow the assistant turn in call order.
        let second = &backend.requests()[1].messages;
        assert_eq!(second[3].tool_call_id(), Some("call_a"));
        assert_eq!(second[4].tool_call_id(), Some("call_b"));
    }

    #[tokio::test]
    async fn missing_and_repeated_call_ids_are_renamed() {
        let backend = ScriptedBackend::new([
            AssistantTurn::tool_calls(vec![
                ToolCall::function("", "search_papers", &json!({"query": "a"})),
                ToolCall::function("", "search_papers", &json!({"query": "b"})),
                ToolCall::function("call_x", "search_papers", &json!({"query": "c"})),
                ToolCall::function("call_x", "search_papers", &json!({"query": "d"})),
            ]),
            AssistantTurn::text(DEMO_FINAL_ANSWER),
        ]);
        let gateway = PaperGateway::new(three_papers());

        let result = Harness::new(&backend, &gateway, config()).run("q").await.unwrap();

        let ids: Vec<&str> = result.entries[0]
            .tool_calls
            .as_ref()
            .unwrap()
            .iter()
            .map(|r| r.tool_call_id.as_str())
            .collect();
        assert_eq!(ids, vec!["call_1_1", "call_1_2", "call_x", "call_1_4"]);

        let second = &backend.requests()[1].messages;
        let sent: Vec<&str> = second[2].tool_calls().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(sent, ids);
        let answered: Vec<Option<&str>> = second[3..7].iter().map(|m| m.tool_call_id()).collect();
        assert_eq!(answered, ids.iter().map(|id| Some(*id)).collect::<Vec<_>>());
        assert!(crate::context::groups::is_valid_transcript(second));
    }

    #[tokio::test]
    async fn backend_failure_is_recorded() {
        let backend = ScriptedBackend::new([search_call(json!({"query": "x"}))]).then_fail("HTTP 503");
        let gateway = PaperGateway::new(three_papers());
        let sink = MemorySink::new();

        let result = Harness::new(&backend, &gateway, config())
            .with_sink(&sink)
            .run("q")
            .await
            .unwrap();

        assert_eq!(result.state, LoopState::Failed);
        assert_eq!(result.entries.len(), 2);
        let error = result.entries[1].error.as_deref().unwrap();
        assert!(error.starts_with("Error in iteration 2:"));
        assert!(error.contains("HTTP 503"));
        assert_eq!(sink.results()[0].entries.len(), 2);
    }

    #[tokio::test]
    async fn listing_failure_is_fatal() {
        let backend = ScriptedBackend::demo();
        let err = Harness::new(&backend, &DownGateway, config())
            .run("q")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Gateway(GatewayError::Connection(_))));
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let backend = ScriptedBackend::demo();
        let gateway = PaperGateway::new(three_papers());
        let err = Harness::new(&backend, &gateway, config().with_max_iterations(0))
            .run("q")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[tokio::test]
    async fn stop_signal_cancels_between_iterations() {
        let backend = ScriptedBackend::default().with_fallback(search_call(json!({"query": "x"})));
        let gateway = PaperGateway::new(three_papers());
        let sink = MemorySink::new();
        let stop = AtomicBool::new(false);
        let handler = FnEventHandler::new(|event| {
            if matches!(event, AgentEvent::ToolResult { .. }) {
                stop.store(true, Ordering::SeqCst);
            }
            None
        });

        let result = Harness::new(&backend, &gateway, config())
            .with_event_handler(&handler)
            .with_sink(&sink)
            .with_stop_signal(|| stop.load(Ordering::SeqCst))
            .run("q")
            .await
            .unwrap();

        assert_eq!(result.state, LoopState::Cancelled);
        assert_eq!(result.entries.len(), 1);
        assert_eq!(backend.call_count(), 1);
        assert_eq!(sink.results()[0].state, LoopState::Cancelled);
    }

    #[tokio::test]
    async fn premature_final_gets_corrective_prompt() {
        let backend = ScriptedBackend::new([
            AssistantTurn {
                content: Some("Final Answer: probably GPT-3.".into()),
                tool_calls: vec![ToolCall::function("call_x", "search_papers", &json!({}))],
                usage: None,
            },
            AssistantTurn::text(DEMO_FINAL_ANSWER),
        ]);
        let gateway = PaperGateway::new(three_papers());
        let premature = AtomicUsize::new(0);
        let handler = FnEventHandler::new(|event| {
            if matches!(event, AgentEvent::PrematureFinal { .. }) {
                premature.fetch_add(1, Ordering::SeqCst);
            }
            None
        });

        let result = Harness::new(&backend, &gateway, config())
            .with_event_handler(&handler)
            .run("q")
            .await
            .unwrap();

        assert_eq!(result.state, LoopState::Final);
        assert_eq!(result.entries.len(), 2);
        assert!(!result.entries[0].is_final);
        assert!(result.entries[0].tool_calls.is_none());
        assert_eq!(premature.load(Ordering::SeqCst), 1);
        assert!(gateway.calls.lock().unwrap().is_empty());

        let second = &backend.requests()[1].messages;
        assert!(second[2].tool_calls().is_empty());
        assert!(second[3].content().unwrap().contains("not finished yet"));
    }

    #[tokio::test]
    async fn denied_tool_call_is_an_error_observation() {
        let backend = ScriptedBackend::demo();
        let tools = ToolSet::new().with(search_papers_tool());
        let handler = FnEventHandler::new(|event| match event {
            AgentEvent::ToolExecuting { .. } => Some(EventResponse::Deny("read-only session".into())),
            _ => None,
        });

        let result = Harness::new(&backend, &tools, config())
            .with_event_handler(&handler)
            .run("q")
            .await
            .unwrap();

        let record = &result.entries[0].tool_calls.as_ref().unwrap()[0];
        assert_eq!(
            record.tool_result,
            ToolOutcome::error("Tool call denied: read-only session")
        );
    }

    #[tokio::test]
    async fn demo_run_with_local_tools() {
        let backend = ScriptedBackend::demo();
        let tools = ToolSet::new().with(search_papers_tool());

        let result = Harness::new(&backend, &tools, config()).run("find ML papers from 2020").await.unwrap();

        assert_eq!(result.state, LoopState::Final);
        let record = &result.entries[0].tool_calls.as_ref().unwrap()[0];
        assert!(!record.tool_result.is_error());
        assert!(record.tool_result.text_content().contains("Few-Shot Learners"));
    }

    #[tokio::test]
    async fn compression_events_are_reported() {
        let long = "x".repeat(800);
        let backend = ScriptedBackend::default()
            .then(AssistantTurn::text(format!("Thinking about it. {long}")))
            .then(AssistantTurn::text("Summary of the work so far."))
            .with_fallback(AssistantTurn::text(DEMO_FINAL_ANSWER));
        let gateway = PaperGateway::new(three_papers());
        let compressed = AtomicUsize::new(0);
        let handler = FnEventHandler::new(|event| {
            if matches!(
                event,
                AgentEvent::Compressed { .. } | AgentEvent::CompressionDegraded { .. }
            ) {
                compressed.fetch_add(1, Ordering::SeqCst);
            }
            None
        });
        let context = ContextConfig::default()
            .with_token_limit(250)
            .with_summary_reserve(10);

        let result = Harness::new(&backend, &gateway, config().with_system_prompt("Be brief.").with_context(context))
            .with_event_handler(&handler)
            .run("q")
            .await
            .unwrap();

        assert_eq!(result.state, LoopState::Final);
        assert!(compressed.load(Ordering::SeqCst) >= 1);
    }
}
