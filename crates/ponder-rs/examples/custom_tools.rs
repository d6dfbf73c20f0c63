//! Custom tools example: define a typed tool with `FnTool` and drive it with
//! a scripted model, no network needed.
//!
//! Demonstrates:
//! - Typed argument structs with `Deserialize` + `JsonSchema`
//! - Composing event handlers with `CompositeEventHandler`
//! - Reading tool records and the final answer from the `RunResult`
//!
//! # Usage
//!
//! ```bash
//! cargo run --example custom_tools
//! ```

use ponder_rs::prelude::*;
use ponder_rs::schemars;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

/// Arguments for the `lookup_word` tool.
#[derive(Deserialize, JsonSchema)]
struct LookupWordArgs {
    /// The word to look up.
    word: String,
}

fn lookup_word_tool() -> FnTool {
    let def = ToolDef::new(
        "lookup_word",
        "Look up the definition of an English word.",
        json_schema_for::<LookupWordArgs>(),
    );
    FnTool::new(def, |args: LookupWordArgs| async move {
        match args.word.to_lowercase().as_str() {
            "ephemeral" => Ok("ephemeral: lasting for a very short time.".to_string()),
            other => Err(format!("no entry for '{other}'")),
        }
    })
}

const ANSWER: &str = "\
1. What have we learned?
The dictionary defines 'ephemeral' as lasting for a very short time.

2. Do we need more information?
No, the definition answers the question.

3. Are we ready for a Final Answer?
Yes.

Final Answer: 'Ephemeral' means lasting for a very short time.";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let tools = ToolSet::new().with(lookup_word_tool());

    let backend = ScriptedBackend::new([
        AssistantTurn::tool_calls(vec![ToolCall::function(
            "call_1",
            "lookup_word",
            &json!({"word": "ephemeral"}),
        )]),
        AssistantTurn::text(ANSWER),
    ]);

    let handler = CompositeEventHandler::new()
        .with(LoggingHandler)
        .with(FnEventHandler::new(|event: &AgentEvent<'_>| {
            if let AgentEvent::ToolResult { name, result, .. } = event {
                eprintln!("[callback] {name} -> {}", result.text_content());
            }
            None
        }));

    let result = Harness::new(&backend, &tools, AgentConfig::new("scripted"))
        .with_event_handler(&handler)
        .run("What does 'ephemeral' mean?")
        .await?;

    println!("state: {}", result.state);
    println!("tool calls: {}", result.tool_call_count());
    println!("{}", result.final_answer().unwrap_or("(no final answer)"));
    Ok(())
}
