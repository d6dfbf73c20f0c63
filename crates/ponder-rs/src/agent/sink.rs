//! Where finished queries go: the [`TranscriptSink`] trait and its
//! plain-text file implementation.

use crate::agent::result::RunResult;
use chrono::Local;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::info;

/// Width of the `=` rules in rendered transcripts.
const RULE_WIDTH: usize = 80;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to write transcript {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to render transcript: {0}")]
    Render(String),
}

/// Receives every finished [`RunResult`], whatever its terminal state.
pub trait TranscriptSink: Send + Sync {
    fn record(&self, result: &RunResult) -> Result<(), SinkError>;
}

// ── File sink ─────────────────────────────────────────────────────

/// Writes one `<YYYY_MM_DD_HH_MM>_result_react.txt` per query into a
/// directory, created on first use.
#[derive(Debug, Clone)]
pub struct FileTranscriptSink {
    dir: PathBuf,
}

impl FileTranscriptSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The file a result is written to, named after its start time.
    pub fn path_for(&self, result: &RunResult) -> PathBuf {
        let stamp = result.started_at.format("%Y_%m_%d_%H_%M");
        self.dir.join(format!("{stamp}_result_react.txt"))
    }
}

impl TranscriptSink for FileTranscriptSink {
    /// Atomic write: render to a temp file, then rename into place.
    fn record(&self, result: &RunResult) -> Result<(), SinkError> {
        std::fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;

        let final_path = self.path_for(result);
        let tmp_path = final_path.with_extension("txt.tmp");
        let text = render_transcript(result)?;
        std::fs::write(&tmp_path, text).map_err(io_err(&tmp_path))?;
        std::fs::rename(&tmp_path, &final_path).map_err(io_err(&final_path))?;

        info!("Results written to: {}", final_path.display());
        Ok(())
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> SinkError + use<> {
    let path = path.to_path_buf();
    move |source| SinkError::Io { path, source }
}

// ── Memory sink ───────────────────────────────────────────────────

/// Keeps results in memory. Useful for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySink {
    results: Mutex<Vec<RunResult>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far, oldest first.
    pub fn results(&self) -> Vec<RunResult> {
        self.results
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl TranscriptSink for MemorySink {
    fn record(&self, result: &RunResult) -> Result<(), SinkError> {
        self.results
            .lock()
            .map_err(|e| SinkError::Render(e.to_string()))?
            .push(result.clone());
        Ok(())
    }
}

// ── Rendering ─────────────────────────────────────────────────────

/// Render a result as the plain-text transcript format.
pub fn render_transcript(result: &RunResult) -> Result<String, SinkError> {
    let rule = "=".repeat(RULE_WIDTH);
    let pretty = |value: &serde_json::Value| {
        serde_json::to_string_pretty(value).map_err(|e| SinkError::Render(e.to_string()))
    };

    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = writeln!(out, "Query: {}", result.query);
    let _ = writeln!(out, "{rule}\n");

    for entry in &result.entries {
        let _ = writeln!(out, "--- Iteration {} ---", entry.iteration);
        if let Some(content) = &entry.content {
            let _ = writeln!(out, "Assistant: {content}");
        }
        if let Some(calls) = entry.tool_calls.as_ref().filter(|c| !c.is_empty()) {
            out.push_str("\nTool Calls:\n");
            for call in calls {
                let _ = writeln!(out, "\nTool: {}", call.tool_name);
                let _ = writeln!(out, "Arguments: {}", pretty(&call.tool_args)?);
                let _ = writeln!(out, "Result: {}", pretty(&call.tool_result.to_value())?);
            }
        }
        if let Some(error) = &entry.error {
            let _ = writeln!(out, "\nERROR: {error}");
        }
        let _ = writeln!(out, "\n{rule}\n");
    }

    let _ = writeln!(out, "\nOutcome: {}", result.state);
    let _ = writeln!(out, "Total iterations: {}", result.entries.len());
    let _ = writeln!(out, "Timestamp: {}", Local::now().format("%Y-%m-%d %H:%M:%S %Z"));
    Ok(out)
}
