//! Tools backed by shell command templates, loaded from a JSON file.
//!
//! The file holds an array of definitions:
//!
//! ```json
//! [
//!   {
//!     "name": "word_count",
//!     "description": "Count words in a file",
//!     "parameters": {"type": "object", "properties": {"path": {"type": "string"}}, "required": ["path"]},
//!     "command": "wc -w {{path}}"
//!   }
//! ]
//! ```
//!
//! Each `{{param}}` placeholder is replaced by the shell-quoted argument
//! value. Missing arguments render as an empty quoted string. The rendered
//! command runs via `sh -c`.

use crate::ToolDef;
use crate::tools::core::{Tool, ToolFuture};
use crate::tools::gateway::{GatewayError, function_parameters};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tokio::process::Command;
use tracing::{debug, warn};

/// Substrings that are never executed, matched against the lowercased
/// rendered command.
pub const DEFAULT_BLOCKED_COMMANDS: &[&str] = &["rm -rf /", "mkfs", "> /dev/"];

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").expect("valid placeholder regex"));

/// One entry of the tools file.
#[derive(Deserialize, Debug, Clone)]
pub struct CommandToolDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Value,
    pub command: String,
    /// Working directory for the command. Defaults to the process cwd.
    #[serde(default)]
    pub workdir: Option<PathBuf>,
}

/// A tool that renders its command template and runs it through the shell.
#[derive(Debug, Clone)]
pub struct ShellCommandTool {
    def: CommandToolDef,
    blocked_commands: Vec<String>,
}

impl ShellCommandTool {
    pub fn new(def: CommandToolDef) -> Self {
        Self {
            def,
            blocked_commands: DEFAULT_BLOCKED_COMMANDS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }

    /// Add a blocked command pattern (lowercased substring match).
    pub fn block_command(mut self, pattern: impl Into<String>) -> Self {
        self.blocked_commands.push(pattern.into().to_lowercase());
        self
    }

    /// The command this tool would run for `arguments`.
    pub fn render(&self, arguments: &Value) -> String {
        render_command(&self.def.command, arguments)
    }

    fn blocked_pattern(&self, command: &str) -> Option<&str> {
        let lowered = command.to_lowercase();
        self.blocked_commands
            .iter()
            .find(|p| lowered.contains(p.as_str()))
            .map(String::as_str)
    }
}

impl Tool for ShellCommandTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            self.def.name.clone(),
            self.def.description.clone(),
            function_parameters(&self.def.parameters),
        )
    }

    fn execute(&self, arguments: &Value) -> ToolFuture<'_> {
        let command = self.render(arguments);
        Box::pin(async move {
            if let Some(pattern) = self.blocked_pattern(&command) {
                warn!("Blocked command for tool {}: matched {pattern:?}", self.def.name);
                return Err(format!("Command blocked: matches forbidden pattern '{pattern}'"));
            }
            debug!("[{}] sh -c {command}", self.def.name);
            run_shell(self.def.workdir.as_deref(), &command).await
        })
    }
}

/// Load every tool defined in a JSON tools file.
pub fn load_tools(path: &Path) -> Result<Vec<ShellCommandTool>, GatewayError> {
    let raw = std::fs::read_to_string(path)?;
    let defs: Vec<CommandToolDef> = serde_json::from_str(&raw)
        .map_err(|e| GatewayError::Definitions(format!("{}: {e}", path.display())))?;
    for def in &defs {
        if def.name.trim().is_empty() {
            return Err(GatewayError::Definitions(format!(
                "{}: tool with empty name",
                path.display()
            )));
        }
    }
    Ok(defs.into_iter().map(ShellCommandTool::new).collect())
}

/// Replace `{{param}}` placeholders with shell-quoted argument values.
/// Strings are inserted as-is, other JSON values in their JSON form.
pub fn render_command(template: &str, arguments: &Value) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let value = match arguments.get(&caps[1]) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            };
            shell_quote(&value)
        })
        .into_owned()
}

/// Single-quote a value for `sh`.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Run a shell command (`sh -c`), optionally in a working directory.
/// A non-zero exit is an `Err` carrying both streams.
async fn run_shell(workdir: Option<&Path>, command: &str) -> Result<String, String> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    if let Some(dir) = workdir {
        cmd.current_dir(dir);
    }
    match cmd.output().await {
        Ok(output) => format_output(output),
        Err(e) => Err(format!("Error running command: {e}")),
    }
}

fn format_output(output: std::process::Output) -> Result<String, String> {
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    if output.status.success() {
        if stderr.is_empty() {
            Ok(stdout)
        } else {
            Ok(format!("{stdout}\n[stderr]\n{stderr}"))
        }
    } else {
        Err(format!("Command failed ({}):\n{stdout}\n{stderr}", output.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn tool(command: &str) -> ShellCommandTool {
        ShellCommandTool::new(CommandToolDef {
            name: "t".into(),
            description: "test".into(),
            parameters: json!({"type": "object", "properties": {"text": {"type": "string"}}}),
            command: command.into(),
            workdir: None,
        })
    }

    #[test]
    fn placeholders_are_quoted() {
        assert_eq!(
            render_command("echo {{text}} {{ n }}", &json!({"text": "it's", "n": 3})),
            r"echo 'it'\''s' '3'"
        );
        assert_eq!(render_command("echo {{missing}}", &json!({})), "echo ''");
        assert_eq!(render_command("echo {text}", &json!({"text": "x"})), "echo {text}");
    }

    #[test]
    fn definition_has_object_schema() {
        let def = tool("true").definition();
        assert_eq!(def.function.name, "t");
        assert_eq!(def.function.parameters["type"], "object");
        assert_eq!(def.function.parameters["required"], json!([]));
    }

    #[tokio::test]
    async fn runs_rendered_command() {
        let out = tool("printf %s {{text}}").execute(&json!({"text": "a; rm x"})).await;
        assert_eq!(out, Ok("a; rm x".to_string()));
    }

    #[tokio::test]
    async fn non_zero_exit_is_err() {
        let err = tool("echo oops >&2; exit 3").execute(&json!({})).await.unwrap_err();
        assert!(err.starts_with("Command failed"));
        assert!(err.contains("oops"));
    }

    #[tokio::test]
    async fn stderr_appended_on_success() {
        let out = tool("echo out; echo warn >&2").execute(&json!({})).await.unwrap();
        assert_eq!(out, "out\n\n[stderr]\nwarn\n");
    }

    #[tokio::test]
    async fn blocked_commands_never_run() {
        let err = tool("MKFS.ext4 /dev/null").execute(&json!({})).await.unwrap_err();
        assert!(err.contains("blocked"));

        let custom = tool("curl example.com").block_command("CURL");
        assert!(custom.execute(&json!({})).await.is_err());
    }

    #[test]
    fn loads_tools_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"name": "greet", "description": "Say hi", "command": "echo hi {{{{who}}}}"}}]"#
        )
        .unwrap();
        let tools = load_tools(file.path()).unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name(), "greet");
        assert_eq!(tools[0].render(&json!({"who": "bob"})), "echo hi 'bob'");
    }

    #[test]
    fn load_rejects_bad_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(load_tools(file.path()), Err(GatewayError::Definitions(_))));

        let missing = load_tools(Path::new("/definitely/not/here.json"));
        assert!(matches!(missing, Err(GatewayError::Io(_))));
    }
}
