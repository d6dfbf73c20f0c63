//! Prompts the loop injects into the conversation.
//!
//! [`SystemPromptBuilder`] assembles the ReAct system prompt from sections.
//! The free functions build the user-role messages the loop appends between
//! model turns: the query seed, the reflection prompt after tool results, and
//! the two corrective prompts.

use crate::agent::judge::{Section, Verdict};

/// Builder for multi-section system prompts.
///
/// Sections are joined with double newlines. Sections with empty content are
/// skipped.
///
/// ```
/// use ponder_rs::agent::prompt::SystemPromptBuilder;
///
/// let prompt = SystemPromptBuilder::new("You are a research agent.")
///     .section("Tools", "search_papers finds papers.")
///     .section_if(false, "Hidden", || "never shown".into())
///     .build();
///
/// assert!(prompt.contains("## Tools"));
/// assert!(!prompt.contains("Hidden"));
/// ```
pub struct SystemPromptBuilder {
    sections: Vec<String>,
}

impl SystemPromptBuilder {
    /// Start with a preamble that gets no heading.
    pub fn new(preamble: impl Into<String>) -> Self {
        Self {
            sections: vec![preamble.into()],
        }
    }

    /// Append a `## heading` section. Skipped if `content` is empty.
    pub fn section(mut self, heading: &str, content: impl Into<String>) -> Self {
        let content = content.into();
        if !content.is_empty() {
            self.sections.push(format!("## {heading}\n\n{content}"));
        }
        self
    }

    /// Append a section only when `condition` holds. The content closure is
    /// not called otherwise.
    pub fn section_if(self, condition: bool, heading: &str, content: impl FnOnce() -> String) -> Self {
        if condition {
            self.section(heading, content())
        } else {
            self
        }
    }

    pub fn build(self) -> String {
        self.sections.join("\n\n")
    }
}

/// The default ReAct system prompt for the given finality marker.
pub fn default_system_prompt(marker: &str) -> String {
    SystemPromptBuilder::new(
        "You are a capable AI assistant that solves problems with the ReAct \
         (Reasoning and Acting) framework.",
    )
    .section(
        "Method",
        "For every query, work in iterations:\n\
         1. Thought: consider the current state of the problem, what is known, and what to do next.\n\
         2. Action: choose a suitable tool to act (when one is needed).\n\
         3. Observation: analyze what the tool returned.\n\
         4. Reflection: assess your progress and whether more exploration is needed.\n\
         5. Plan: decide on the next action.",
    )
    .section(
        "Every iteration",
        "State explicitly:\n\
         - whether your current understanding is complete\n\
         - whether you need more information\n\
         - whether you are ready to give the final answer",
    )
    .section(
        "Finishing",
        format!(
            "Only when you are confident you have the most complete and accurate answer, \
             end with the \"{marker}\" marker. Before it, answer each of these questions \
             under its own heading:\n1. {}\n2. {}\n3. {}",
            Section::Learned.question(),
            Section::NeedMoreInfo.question(),
            Section::ReadyForFinal.question(),
        ),
    )
    .build()
}

/// The first user message of a query.
pub fn user_seed(query: &str) -> String {
    format!("Query: {query}\n\nLet's approach this step-by-step:")
}

/// The user message appended after all tool results of one turn. Each
/// observation is a `(tool name, result payload)` pair.
pub fn reflection_prompt(observations: &[(String, String)]) -> String {
    let mut prompt = String::from("Based on the tool results:\n");
    for (name, result) in observations {
        prompt.push_str(&format!("Tool '{name}' returned: {result}\n"));
    }
    prompt.push_str("\nPlease analyze these results and decide:\n");
    for (n, section) in Section::ALL.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", n + 1, section.question()));
    }
    prompt
}

/// The user message appended when a turn neither acts nor concludes.
pub fn continue_prompt(marker: &str) -> String {
    let label = marker.trim_end_matches(':');
    format!(
        "You haven't used any tools or provided a {label}. Please either use tools to \
         gather more information or provide a {label} if you have enough information."
    )
}

/// The user message appended when a `Final Answer:` claim is rejected.
pub fn premature_final_prompt(verdict: &Verdict, marker: &str) -> String {
    let mut prompt = format!(
        "You wrote \"{marker}\", but the analysis is not finished yet. Do not stop here; \
         continue working on the query."
    );
    if !verdict.missing_sections.is_empty() {
        prompt.push_str("\n\nAnswer each of these under its own heading, with real content:");
        for section in &verdict.missing_sections {
            prompt.push_str(&format!("\n- {section}"));
        }
    }
    if !verdict.pending_signals.is_empty() {
        prompt.push_str("\n\nYour answer still points at unfinished work:");
        for signal in &verdict.pending_signals {
            prompt.push_str(&format!("\n- {signal}"));
        }
        prompt.push_str(
            "\nResolve these first, using tools if needed, or state explicitly why they do \
             not matter for the answer.",
        );
    }
    prompt.push_str(&format!(
        "\n\nGive the \"{marker}\" only once every question is settled."
    ));
    prompt
}
