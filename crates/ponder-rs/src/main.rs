//! Answer questions with a ReAct agent over an OpenAI-compatible model.
//!
//! Reads the API key from `OPENAI_API_KEY` (or `AZURE_OPENAI_API_KEY` for
//! Azure deployments). Every query is written to a plain-text transcript in
//! `--output-dir`.
//!
//! # Examples
//!
//! ```sh
//! # Single query
//! ponder "find ML papers from 2020"
//!
//! # Offline demo with the scripted backend and the built-in paper search
//! ponder --mock "find ML papers from 2020"
//!
//! # Interactive mode with shell-command tools and a sliding window
//! ponder --interactive --tools tools.json --max-messages 40
//!
//! # Azure OpenAI deployment
//! ponder --azure-endpoint https://my-resource.openai.azure.com \
//!   --azure-deployment gpt-4o "summarize recent diffusion model papers"
//! ```

use ponder_rs::agent::{
    AgentConfig, AgentEvent, CompositeEventHandler, EventHandler, EventResponse,
    FileTranscriptSink, Harness, LoggingHandler, LoopState, RunResult,
};
use ponder_rs::api::{ModelBackend, RetryConfig, ScriptedBackend};
use ponder_rs::context::ContextConfig;
use ponder_rs::tools::{ToolSet, load_tools, search_papers_tool};
use ponder_rs::{ChatClient, DEFAULT_AZURE_API_VERSION, DEFAULT_MODEL, Endpoint, OPENAI_BASE_URL};
use clap::Parser;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Answer questions with a ReAct agent over an OpenAI-compatible model.
#[derive(Parser)]
#[command(name = "ponder", version)]
struct Cli {
    /// Query to answer. Omit with --interactive.
    query: Option<String>,

    /// Read queries from stdin until `quit` or `exit`
    #[arg(short, long)]
    interactive: bool,

    // ── Backend ────────────────────────────────────────────────
    /// Use the scripted demo backend instead of a real model
    #[arg(long, env = "MOCK")]
    mock: bool,

    /// Model name sent with every request
    #[arg(long, env = "OPENAI_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// API key for OpenAI-compatible servers
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Base URL of an OpenAI-compatible server
    #[arg(long, env = "OPENAI_BASE_URL", default_value = OPENAI_BASE_URL)]
    base_url: String,

    /// Azure OpenAI resource endpoint. Selects the Azure backend when set.
    #[arg(long, env = "AZURE_OPENAI_ENDPOINT")]
    azure_endpoint: Option<String>,

    /// Azure OpenAI deployment name
    #[arg(long, env = "AZURE_OPENAI_DEPLOYMENT")]
    azure_deployment: Option<String>,

    /// Azure OpenAI REST API version
    #[arg(long, env = "AZURE_OPENAI_API_VERSION", default_value = DEFAULT_AZURE_API_VERSION)]
    azure_api_version: String,

    /// API key for Azure OpenAI
    #[arg(long, env = "AZURE_OPENAI_API_KEY", hide_env_values = true)]
    azure_api_key: Option<String>,

    /// Retries for transient API failures (0 disables)
    #[arg(long, env = "MAX_RETRIES", default_value_t = 0)]
    retries: u32,

    // ── Agent loop ─────────────────────────────────────────────
    /// Model calls allowed per query
    #[arg(long, env = "MAX_ITERATIONS", default_value_t = 10)]
    max_iterations: u32,

    /// Sampling temperature
    #[arg(long, env = "TEMPERATURE", default_value_t = 0.7)]
    temperature: f32,

    /// Path to a JSON file of shell-command tools
    #[arg(long, env = "TOOLS_FILE")]
    tools: Option<PathBuf>,

    // ── Context budget ─────────────────────────────────────────
    /// Context window size in tokens
    #[arg(long, env = "TOKEN_LIMIT", default_value_t = 128_000)]
    token_limit: usize,

    /// Fraction of the window above which scheduled compression runs
    #[arg(long, env = "THRESHOLD_RATIO", default_value_t = 0.8)]
    threshold_ratio: f64,

    /// Scheduled compression runs every N iterations
    #[arg(long, env = "COMPRESSION_INTERVAL", default_value_t = 5)]
    compression_interval: u32,

    /// Send at most this many messages (sliding window)
    #[arg(long, env = "MAX_MESSAGES")]
    max_messages: Option<usize>,

    /// HuggingFace tokenizer.json for exact token counts
    #[arg(long, env = "TOKENIZER_PATH")]
    tokenizer: Option<PathBuf>,

    // ── Output ─────────────────────────────────────────────────
    /// Directory for transcript files
    #[arg(long, env = "OUTPUT_DIR", default_value = "outputs")]
    output_dir: PathBuf,

    /// Do not write transcript files
    #[arg(long)]
    no_transcript: bool,

    /// Debug-level logging (overrides RUST_LOG)
    #[arg(short, long)]
    verbose: bool,
}

/// Prints loop progress to stderr.
struct CliEventHandler;

impl EventHandler for CliEventHandler {
    fn on_event(&self, event: &AgentEvent<'_>) -> Option<EventResponse> {
        match event {
            AgentEvent::IterationStart {
                iteration,
                max_iterations,
                ..
            } => {
                eprintln!("  [iteration {iteration}/{max_iterations}]");
            }
            AgentEvent::ToolExecuting { name, arguments } => {
                eprintln!("  [tool_call] {name}({arguments})");
            }
            AgentEvent::PrematureFinal { .. } => {
                eprintln!("  [judge] final answer rejected, continuing");
            }
            _ => {}
        }
        None
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn build_backend(cli: &Cli) -> Result<Box<dyn ModelBackend>, String> {
    if cli.mock {
        info!("Using the scripted demo backend");
        return Ok(Box::new(ScriptedBackend::demo()));
    }

    let retry = RetryConfig::with_retries(cli.retries);
    let client = match &cli.azure_endpoint {
        Some(endpoint) => {
            let key = cli
                .azure_api_key
                .clone()
                .ok_or("AZURE_OPENAI_API_KEY is not set")?;
            let deployment = cli
                .azure_deployment
                .clone()
                .ok_or("--azure-deployment (AZURE_OPENAI_DEPLOYMENT) is required with an Azure endpoint")?;
            ChatClient::azure(key, endpoint, deployment, &cli.azure_api_version)
        }
        None => {
            let key = cli.api_key.clone().ok_or("OPENAI_API_KEY is not set")?;
            ChatClient::with_endpoint(
                key,
                Endpoint::OpenAi {
                    base_url: cli.base_url.clone(),
                },
            )
        }
    }
    .map_err(|e| format!("failed to create API client: {e}"))?;

    Ok(Box::new(client.with_retry(retry)))
}

fn build_tools(cli: &Cli) -> Result<ToolSet, String> {
    let mut tools = ToolSet::new();
    if let Some(path) = &cli.tools {
        let loaded = load_tools(path).map_err(|e| format!("failed to load tools: {e}"))?;
        info!("Loaded {} tool(s) from {}", loaded.len(), path.display());
        for tool in loaded {
            tools.register(tool);
        }
    }
    if cli.mock || cli.tools.is_none() {
        tools.register(search_papers_tool());
    }
    Ok(tools)
}

/// The transcript sink, or none with `--no-transcript`.
fn build_sink(cli: &Cli) -> Option<FileTranscriptSink> {
    (!cli.no_transcript).then(|| FileTranscriptSink::new(&cli.output_dir))
}

fn build_config(cli: &Cli) -> AgentConfig {
    let mut context = ContextConfig::default()
        .with_token_limit(cli.token_limit)
        .with_threshold_ratio(cli.threshold_ratio)
        .with_compression_interval(cli.compression_interval)
        .with_max_messages(cli.max_messages);
    if let Some(path) = &cli.tokenizer {
        context = context.with_tokenizer(path);
    }

    AgentConfig::new(&cli.model)
        .with_max_iterations(cli.max_iterations)
        .with_temperature(cli.temperature)
        .with_context(context)
}

/// First Ctrl-C asks the loop to stop at the next iteration; a second one
/// exits immediately.
fn spawn_interrupt_watcher(stop: Arc<AtomicBool>) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if stop.swap(true, Ordering::SeqCst) {
                eprintln!("Interrupted again, exiting");
                process::exit(130);
            }
            warn!("Interrupt received, stopping after the current step (Ctrl-C again to exit)");
        }
    });
}

fn report(result: &RunResult) {
    match result.state {
        LoopState::Final => {
            if let Some(answer) = result.final_answer() {
                println!("{answer}");
            }
        }
        state => {
            eprintln!(
                "No final answer: {state} after {} iteration(s)",
                result.iterations()
            );
            if let Some(error) = result.entries.last().and_then(|e| e.error.as_deref()) {
                eprintln!("{error}");
            }
        }
    }
}

async fn run_cli(cli: &Cli) -> Result<bool, String> {
    let config = build_config(cli);
    config.validate().map_err(|e| format!("invalid configuration: {e}"))?;

    let backend = build_backend(cli)?;
    let tools = build_tools(cli)?;

    let sink = build_sink(cli);

    let handler = CompositeEventHandler::new()
        .with(LoggingHandler)
        .with(CliEventHandler);

    let stop = Arc::new(AtomicBool::new(false));
    spawn_interrupt_watcher(stop.clone());
    let flag = stop.clone();

    let mut harness = Harness::new(backend.as_ref(), &tools, config)
        .with_event_handler(&handler)
        .with_stop_signal(move || flag.load(Ordering::SeqCst));
    if let Some(sink) = &sink {
        harness = harness.with_sink(sink);
    }

    if !cli.interactive {
        let query = cli
            .query
            .as_deref()
            .ok_or("provide a query, or use --interactive")?;
        let result = harness.run(query).await.map_err(|e| e.to_string())?;
        report(&result);
        return Ok(result.state != LoopState::Failed);
    }

    eprintln!("Interactive mode. Type 'quit' or 'exit' to leave.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stderr = tokio::io::stderr();
    let mut all_ok = true;
    loop {
        // Prompt display is best-effort.
        let _ = stderr.write_all(b"\nQuery> ").await;
        let _ = stderr.flush().await;

        let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| format!("failed to read stdin: {e}"))?
        else {
            break;
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if matches!(query.to_lowercase().as_str(), "quit" | "exit") {
            break;
        }

        stop.store(false, Ordering::SeqCst);
        match harness.run(query).await {
            Ok(result) => {
                all_ok &= result.state != LoopState::Failed;
                report(&result);
            }
            Err(e) => return Err(e.to_string()),
        }
    }
    Ok(all_ok)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run_cli(&cli).await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
