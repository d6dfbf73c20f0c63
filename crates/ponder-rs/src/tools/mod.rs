//! Tool execution behind the [`ToolGateway`] seam.
//!
//! The agent loop only ever talks to a [`ToolGateway`]: it lists tools once
//! per query and calls them one at a time. [`ToolSet`] is the in-process
//! gateway, handling dispatch, validation, truncation, and timeouts.
//!
//! # Defining tools
//!
//! - **[`FnTool`]** — closure-based, auto-parses arguments into a typed
//!   struct. Best for simple tools.
//! - **`impl Tool`** — full struct with manual [`Tool::definition()`] and
//!   [`Tool::execute()`]. Best for tools with state.
//! - **[`ShellCommandTool`]** — loaded from a JSON tools file with a shell
//!   command template.
//!
//! # Submodules
//!
//! - [`gateway`] — [`ToolGateway`] trait, listing entries, and the
//!   [`ToolOutcome`] result shape.
//! - [`core`] — [`Tool`] trait, [`ToolSet`], [`FnTool`].
//! - [`command`] — [`ShellCommandTool`] and [`load_tools`].
//! - [`demo`] — the canned `search_papers` tool.

pub mod command;
pub mod core;
pub mod demo;
pub mod gateway;

// Re-export commonly used items at the module level.
pub use command::{ShellCommandTool, load_tools, render_command};
pub use core::{DEFAULT_MAX_RESULT_BYTES, FnTool, Tool, ToolFuture, ToolSet, truncate_result};
pub use core::{DEFAULT_TOOL_TIMEOUT, validate_tool_arguments};
pub use demo::search_papers_tool;
pub use gateway::{
    ContentBlock, GatewayError, GatewayFuture, ToolEntry, ToolGateway, ToolOutcome, ToolSpec, tool_defs,
};
