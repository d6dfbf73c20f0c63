//! Prompt construction for LLM-assisted context compression.
//!
//! The [`ContextStore`](super::ContextStore) hands a span of whole message
//! groups to these helpers, sends the resulting request to the model
//! backend, and replaces the span with one assistant message holding the
//! summary. Tool provenance (tool name and call id) of every summarized tool
//! exchange is appended to that message so later turns can still tell which
//! tool produced which fact.

use crate::Message;

/// Heading of the assistant message that replaces a compressed span.
pub const SUMMARY_HEADING: &str = "Summary of the conversation so far:";

/// The instruction sent with every compression request.
const SUMMARIZATION_PROMPT: &str = "\
Summarize the following agent conversation so it can replace the original \
messages. Preserve:
1. Key information and findings established so far.
2. Every important tool call: the tool name, the arguments it was called with, \
and a concise statement of what it returned.
3. The current state of reasoning: what has been concluded, what is still open, \
and what the agent was about to do next.

Rules:
- Only include facts stated in the messages. Do not infer or extrapolate.
- Keep tool names, identifiers, numbers and titles verbatim.
- Be concise; the summary must stand on its own.";

/// Maximum characters of a tool result kept in a provenance line.
const PROVENANCE_RESULT_CHARS: usize = 200;

/// Where a summarized fact came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolProvenance {
    pub tool_call_id: String,
    pub name: String,
    pub arguments: String,
}

/// Build the (system, user) message pair for one compression call.
pub fn build_summarization_request(span: &[Message]) -> Vec<Message> {
    vec![
        Message::system(SUMMARIZATION_PROMPT),
        Message::user(render_span(span)),
    ]
}

/// Render messages as labelled plain text, keeping tool linkage visible.
pub fn render_span(span: &[Message]) -> String {
    let mut content = String::new();
    for msg in span {
        match msg {
            Message::Assistant { content: text, .. } if !msg.tool_calls().is_empty() => {
                if let Some(text) = text.as_deref().filter(|t| !t.is_empty()) {
                    content.push_str(&format!("[assistant]: {text}\n"));
                }
                for call in msg.tool_calls() {
                    content.push_str(&format!(
                        "[assistant -> tool call {}]: {}({})\n",
                        call.id, call.function.name, call.function.arguments
                    ));
                }
                content.push('\n');
            }
            Message::Tool {
                tool_call_id,
                name,
                content: result,
            } => {
                let name = name.as_deref().unwrap_or("tool");
                content.push_str(&format!("[tool {name} ({tool_call_id})]: {result}\n\n"));
            }
            other => {
                let text = other.content().unwrap_or("[no content]");
                content.push_str(&format!("[{}]: {text}\n\n", other.role()));
            }
        }
    }
    content
}

/// Collect the tool calls made inside a span, in order.
pub fn tool_provenance(span: &[Message]) -> Vec<ToolProvenance> {
    span.iter()
        .flat_map(|m| m.tool_calls())
        .map(|call| ToolProvenance {
            tool_call_id: call.id.clone(),
            name: call.function.name.clone(),
            arguments: call.function.arguments.clone(),
        })
        .collect()
}

/// The assistant message that stands in for a compressed span.
pub fn summary_message(summary: &str, provenance: &[ToolProvenance], span: &[Message]) -> Message {
    let mut text = format!("{SUMMARY_HEADING}\n{}", summary.trim());
    if !provenance.is_empty() {
        text.push_str("\n\nTool calls covered by this summary:");
        for p in provenance {
            let result = span
                .iter()
                .find(|m| m.tool_call_id() == Some(p.tool_call_id.as_str()))
                .and_then(|m| m.content())
                .map(preview)
                .unwrap_or_else(|| "(no result)".to_string());
            text.push_str(&format!(
                "\n- {} [{}] args={} -> {result}",
                p.name, p.tool_call_id, p.arguments
            ));
        }
    }
    Message::assistant_text(text)
}

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > PROVENANCE_RESULT_CHARS {
        let cut: String = flat.chars().take(PROVENANCE_RESULT_CHARS).collect();
        format!("{cut}...")
    } else {
        flat
    }
}
