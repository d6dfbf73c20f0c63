//! In-process tools and the [`ToolSet`] gateway that dispatches them.
//!
//! The [`Tool`] trait defines what every tool provides: a static definition
//! (name, description, JSON schema) and an async `execute`. Tools are
//! collected into a [`ToolSet`], which implements
//! [`ToolGateway`](super::gateway::ToolGateway) with argument validation,
//! timeouts, and result truncation.

use crate::ToolDef;
use crate::tools::gateway::{GatewayFuture, ToolEntry, ToolGateway, ToolOutcome, ToolSpec};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Maximum size (in bytes) for tool output before truncation.
pub const DEFAULT_MAX_RESULT_BYTES: usize = 30_000;

/// Default timeout for tool execution.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Boxed future returned by [`Tool::execute`]. `Err` is a tool-side failure
/// that the model sees as an error result.
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<String, String>> + Send + 'a>>;

// ── Tool trait ─────────────────────────────────────────────────────

/// A tool the model can invoke via function calling.
///
/// # Example
///
/// ```ignore
/// struct Clock;
///
/// impl Tool for Clock {
///     fn definition(&self) -> ToolDef {
///         ToolDef::new("clock", "Current UTC time", json!({"type": "object"}))
///     }
///
///     fn execute(&self, _arguments: &Value) -> ToolFuture<'_> {
///         Box::pin(async { Ok(chrono::Utc::now().to_rfc3339()) })
///     }
/// }
/// ```
pub trait Tool: Send + Sync {
    /// The definition sent to the model.
    fn definition(&self) -> ToolDef;

    /// Execute with decoded JSON arguments.
    ///
    /// Uses a boxed future so that the trait is dyn-compatible.
    fn execute(&self, arguments: &Value) -> ToolFuture<'_>;

    /// The tool's name (delegates to the definition).
    fn name(&self) -> String {
        self.definition().function.name.clone()
    }
}

// ── ToolSet ────────────────────────────────────────────────────────

/// A collection of tools dispatched by name.
///
/// ```ignore
/// let tools = ToolSet::new()
///     .with_max_result_bytes(15_000)
///     .with_arg_validation(true)
///     .with_default_timeout(Some(Duration::from_secs(30)))
///     .with(search_papers_tool());
///
/// let result = Harness::new(&backend, &tools, config).run("query").await?;
/// ```
pub struct ToolSet {
    tools: HashMap<String, Box<dyn Tool>>,
    max_result_bytes: usize,
    /// Whether to validate tool arguments against JSON Schema before execution.
    validate_args: bool,
    /// Timeout for each execution. `None` disables timeouts.
    default_timeout: Option<Duration>,
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSet")
            .field("tools", &self.names())
            .field("max_result_bytes", &self.max_result_bytes)
            .field("validate_args", &self.validate_args)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl ToolSet {
    /// Create an empty tool set. Arguments are validated and calls time out
    /// after [`DEFAULT_TOOL_TIMEOUT`].
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
            validate_args: true,
            default_timeout: Some(DEFAULT_TOOL_TIMEOUT),
        }
    }

    /// Set the maximum result size in bytes before truncation.
    pub fn with_max_result_bytes(mut self, max: usize) -> Self {
        self.max_result_bytes = max;
        self
    }

    /// Enable or disable JSON Schema argument validation.
    pub fn with_arg_validation(mut self, enabled: bool) -> Self {
        self.validate_args = enabled;
        self
    }

    /// Set the per-call timeout. `None` disables timeouts.
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_boxed(Box::new(tool));
    }

    /// Register an already boxed tool.
    pub fn register_boxed(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name();
        if self.tools.contains_key(&name) {
            debug!("Replacing tool {name}");
        }
        self.tools.insert(name, tool);
    }

    /// Register a tool (builder pattern).
    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    /// Register several boxed tools (builder pattern).
    pub fn with_all(mut self, tools: impl IntoIterator<Item = Box<dyn Tool>>) -> Self {
        for tool in tools {
            self.register_boxed(tool);
        }
        self
    }

    /// All tool definitions, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDef> {
        let mut defs: Vec<ToolDef> = self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool call by name with validation, timing, timeout, and
    /// truncation.
    pub async fn execute(&self, name: &str, arguments: &Value) -> ToolOutcome {
        let Some(tool) = self.tools.get(name) else {
            return ToolOutcome::error(format!("Tool {name} not found"));
        };

        if self.validate_args
            && let Some(error) = validate_tool_arguments(tool.as_ref(), arguments)
        {
            return ToolOutcome::error(error);
        }

        log_tool_call(name, arguments);
        let start = std::time::Instant::now();

        let result = match self.default_timeout {
            Some(limit) => match tokio::time::timeout(limit, tool.execute(arguments)).await {
                Ok(r) => r,
                Err(_) => {
                    info!(
                        "Tool {name} timed out after {:.1}s (limit: {:.0}s)",
                        start.elapsed().as_secs_f64(),
                        limit.as_secs_f64(),
                    );
                    return ToolOutcome::error(format!(
                        "Tool '{name}' timed out after {:.0} seconds. \
                         Consider using different or narrower arguments.",
                        limit.as_secs_f64(),
                    ));
                }
            },
            None => tool.execute(arguments).await,
        };

        let elapsed = start.elapsed();
        match result {
            Ok(text) => {
                debug!(
                    "Tool {name} completed in {:.0}ms ({} bytes)",
                    elapsed.as_secs_f64() * 1000.0,
                    text.len()
                );
                trace!("Tool {name} result preview: {}", preview(&text, 300));
                ToolOutcome::text(truncate_result(text, self.max_result_bytes))
            }
            Err(text) => {
                debug!("Tool {name} failed in {:.0}ms: {}", elapsed.as_secs_f64() * 1000.0, preview(&text, 200));
                ToolOutcome::failed(truncate_result(text, self.max_result_bytes))
            }
        }
    }
}

impl Default for ToolSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolGateway for ToolSet {
    fn list_tools(&self) -> GatewayFuture<'_, Vec<ToolEntry>> {
        let entries = self
            .definitions()
            .into_iter()
            .map(|def| {
                ToolEntry::Tool(ToolSpec {
                    name: def.function.name,
                    description: def.function.description,
                    input_schema: def.function.parameters,
                })
            })
            .collect();
        Box::pin(async move { Ok(entries) })
    }

    fn call_tool<'a>(&'a self, name: &'a str, arguments: &'a Value) -> GatewayFuture<'a, ToolOutcome> {
        Box::pin(async move { Ok(self.execute(name, arguments).await) })
    }
}

// ── FnTool ────────────────────────────────────────────────────────

/// Type-erased async handler for [`FnTool`].
type ErasedToolHandler =
    Box<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<String, String>> + Send>> + Send + Sync>;

/// A closure-based tool that auto-parses arguments and delegates to a handler.
///
/// Use [`FnTool`] for stateless tools. For tools with shared state, define a
/// struct and implement [`Tool`] directly.
///
/// ```ignore
/// #[derive(Deserialize, JsonSchema)]
/// struct EchoArgs {
///     /// Text to echo back.
///     text: String,
/// }
///
/// let tool = FnTool::new(
///     ToolDef::new("echo", "Echo the input", json_schema_for::<EchoArgs>()),
///     |args: EchoArgs| async move { Ok(args.text) },
/// );
/// ```
pub struct FnTool {
    def: ToolDef,
    handler: ErasedToolHandler,
}

impl FnTool {
    /// Create a closure-based tool. Arguments that do not deserialize into
    /// `A` become an error result without calling the handler.
    pub fn new<A, F, Fut>(def: ToolDef, handler: F) -> Self
    where
        A: serde::de::DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, String>> + Send + 'static,
    {
        let erased = move |raw: Value| -> Pin<Box<dyn Future<Output = Result<String, String>> + Send>> {
            match serde_json::from_value::<A>(raw) {
                Ok(args) => Box::pin(handler(args)),
                Err(e) => Box::pin(async move {
                    Err(format!(
                        "invalid tool arguments: {e}. \
                         Please provide valid JSON matching the tool's parameter schema."
                    ))
                }),
            }
        };

        Self {
            def,
            handler: Box::new(erased),
        }
    }
}

impl Tool for FnTool {
    fn definition(&self) -> ToolDef {
        self.def.clone()
    }

    fn execute(&self, arguments: &Value) -> ToolFuture<'_> {
        Box::pin((self.handler)(arguments.clone()))
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.def.function.name)
            .finish()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Validate arguments against the tool's declared JSON Schema.
///
/// Returns `None` if valid, or a message the model can act on.
pub fn validate_tool_arguments(tool: &dyn Tool, arguments: &Value) -> Option<String> {
    let schema = tool.definition().function.parameters;

    // An invalid schema is the tool author's problem; skip validation.
    let validator = jsonschema::validator_for(&schema).ok()?;

    let errors: Vec<String> = validator
        .iter_errors(arguments)
        .map(|e| format!("  - {}: {e}", e.instance_path()))
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "Argument validation failed for tool '{}':\n{}\n\
             Please fix the arguments and try again.",
            tool.name(),
            errors.join("\n")
        ))
    }
}

/// Log a tool call at INFO level with a truncated preview of arguments.
pub fn log_tool_call(name: &str, arguments: &Value) {
    let raw = arguments.to_string();
    info!("[tool] {name}({})", preview(&raw, 120));
    trace!("[tool] {name} arguments: {raw}");
}

/// Truncate a string to at most `max` bytes (on a char boundary), appending
/// a notice if trimmed.
pub fn truncate_result(s: String, max: usize) -> String {
    if s.len() <= max {
        return s;
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}...\n[truncated: {} bytes total]",
        s.get(..cut).unwrap_or_default(),
        s.len()
    )
}

fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::JsonSchema;
    use serde::Deserialize;
    use serde_json::json;

    struct EchoTool;

    impl Tool for EchoTool {
        fn definition(&self) -> ToolDef {
            ToolDef::new(
                "echo",
                "Echo the input",
                json!({
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"]
                }),
            )
        }

        fn execute(&self, arguments: &Value) -> ToolFuture<'_> {
            let text = arguments["text"].as_str().unwrap_or_default().to_string();
            Box::pin(async move { Ok(text) })
        }
    }

    struct FailingTool;

    impl Tool for FailingTool {
        fn definition(&self) -> ToolDef {
            ToolDef::new("fail", "Always fails", json!({"type": "object"}))
        }

        fn execute(&self, _arguments: &Value) -> ToolFuture<'_> {
            Box::pin(async { Err("disk on fire".to_string()) })
        }
    }

    struct SlowTool;

    impl Tool for SlowTool {
        fn definition(&self) -> ToolDef {
            ToolDef::new("slow", "Sleeps", json!({"type": "object"}))
        }

        fn execute(&self, _arguments: &Value) -> ToolFuture<'_> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok("done".to_string())
            })
        }
    }

    #[test]
    fn tool_name_from_definition() {
        assert_eq!(EchoTool.name(), "echo");
    }

    #[test]
    fn definitions_sorted() {
        let tools = ToolSet::new().with(FailingTool).with(EchoTool);
        let names: Vec<_> = tools.definitions().into_iter().map(|d| d.function.name).collect();
        assert_eq!(names, vec!["echo", "fail"]);
        assert_eq!(tools.len(), 2);
    }

    #[tokio::test]
    async fn execute_known_tool() {
        let tools = ToolSet::new().with(EchoTool);
        let outcome = tools.execute("echo", &json!({"text": "hello"})).await;
        assert_eq!(outcome, ToolOutcome::text("hello"));
    }

    #[tokio::test]
    async fn unknown_tool_is_error_outcome() {
        let tools = ToolSet::new();
        let outcome = tools.execute("nope", &json!({})).await;
        assert_eq!(outcome, ToolOutcome::error("Tool nope not found"));
    }

    #[tokio::test]
    async fn tool_failure_sets_is_error() {
        let tools = ToolSet::new().with(FailingTool);
        let outcome = tools.execute("fail", &json!({})).await;
        assert_eq!(outcome, ToolOutcome::failed("disk on fire"));
    }

    #[tokio::test]
    async fn validation_rejects_missing_required() {
        let tools = ToolSet::new().with(EchoTool);
        let outcome = tools.execute("echo", &json!({})).await;
        assert!(matches!(&outcome, ToolOutcome::Error { error } if error.contains("validation failed")));

        let lenient = ToolSet::new().with_arg_validation(false).with(EchoTool);
        assert!(!lenient.execute("echo", &json!({})).await.is_error());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_becomes_error() {
        let tools = ToolSet::new()
            .with_default_timeout(Some(Duration::from_secs(1)))
            .with(SlowTool);
        let outcome = tools.execute("slow", &json!({})).await;
        assert!(outcome.text_content().contains("timed out after 1 seconds"));
    }

    #[tokio::test]
    async fn long_results_truncated() {
        let tools = ToolSet::new().with_max_result_bytes(10).with(EchoTool);
        let outcome = tools.execute("echo", &json!({"text": "x".repeat(50)})).await;
        assert!(outcome.text_content().contains("[truncated: 50 bytes total]"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_result("short".into(), 100), "short");
        let cut = truncate_result("日本語テキスト".into(), 4);
        assert!(cut.starts_with("日..."));
    }

    #[tokio::test]
    async fn gateway_lists_and_calls() {
        let tools = ToolSet::new().with(EchoTool);
        let entries = tools.list_tools().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].as_tool().unwrap().input_schema["required"], json!(["text"]));

        let args = json!({"text": "hi"});
        let outcome = tools.call_tool("echo", &args).await.unwrap();
        assert_eq!(outcome.text_content(), "hi");
    }

    #[tokio::test]
    async fn fn_tool_parses_typed_args() {
        #[derive(Deserialize, JsonSchema)]
        struct AddArgs {
            a: i64,
            b: i64,
        }

        let tool = FnTool::new(
            ToolDef::new("add", "Add two numbers", crate::json_schema_for::<AddArgs>()),
            |args: AddArgs| async move { Ok((args.a + args.b).to_string()) },
        );
        assert_eq!(tool.execute(&json!({"a": 2, "b": 3})).await, Ok("5".to_string()));

        let err = tool.execute(&json!({"a": "two"})).await.unwrap_err();
        assert!(err.contains("invalid tool arguments"));
    }
}
