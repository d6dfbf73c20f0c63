//! Minimal agent: one query against an OpenAI-compatible model with the
//! built-in paper search tool, recorded to `outputs/`.
//!
//! # Usage
//!
//! ```bash
//! OPENAI_API_KEY=sk-... cargo run --example basic_agent
//! ```

use ponder_rs::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let api_key = std::env::var("OPENAI_API_KEY")
        .map_err(|_| "Set OPENAI_API_KEY to your OpenAI API key")?;
    let client = ChatClient::openai(api_key)?;

    let tools = ToolSet::new().with(search_papers_tool());
    let sink = FileTranscriptSink::new("outputs");

    let config = AgentConfig::new("gpt-4o")
        .with_max_iterations(6)
        .with_context(ContextConfig::default().with_max_messages(Some(40)));

    let result = Harness::new(&client, &tools, config)
        .with_event_handler(&LoggingHandler)
        .with_sink(&sink)
        .run("Find influential machine learning papers from 2020")
        .await?;

    match result.final_answer() {
        Some(answer) => println!("{answer}"),
        None => eprintln!("Stopped without a final answer ({})", result.state),
    }
    Ok(())
}
