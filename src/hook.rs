//! Error-string scanner for agent tool output
//!
//! Agent runtimes pipe tool responses through the `hook check-error`
//! command; when an error indicator shows up and `hooks.error_nudge`
//! is enabled, a one-line nudge reminds the agent to record what went
//! wrong once it is fixed.

use serde::Deserialize;

use crate::config::Config;

/// Case-insensitive substrings that mark a tool response as an error.
const ERROR_INDICATORS: &[&str] = &[
    "error",
    "exception",
    "traceback",
    "panic",
    "failed",
    "failure",
    "fatal",
    "econnrefused",
    "enoent",
    "permission denied",
    "command not found",
    "no such file",
];

/// Hook input payload as sent by agent runtimes. Some runtimes put the
/// output under `tool_response`, others under `stdout`.
#[derive(Debug, Default, Deserialize)]
pub struct HookInput {
    #[serde(default)]
    pub tool_response: String,
    #[serde(default)]
    pub stdout: String,
}

impl HookInput {
    /// Parse hook input from raw stdin. Non-JSON input is treated as
    /// the tool output itself.
    pub fn from_stdin_text(raw: &str) -> Self {
        match serde_json::from_str(raw) {
            Ok(input) => input,
            Err(_) => Self {
                tool_response: raw.trim().to_string(),
                stdout: String::new(),
            },
        }
    }

    /// All output text to scan, whichever field carried it.
    pub fn output(&self) -> String {
        match (self.tool_response.is_empty(), self.stdout.is_empty()) {
            (false, false) => format!("{}\n{}", self.tool_response, self.stdout),
            (false, true) => self.tool_response.clone(),
            (true, _) => self.stdout.clone(),
        }
    }
}

/// Error indicators present in the output, in match order.
pub fn scan_for_errors(output: &str) -> Vec<&'static str> {
    let lower = output.to_lowercase();
    ERROR_INDICATORS
        .iter()
        .filter(|indicator| lower.contains(*indicator))
        .copied()
        .collect()
}

/// Whether the nudge should be printed for this output.
pub fn should_nudge(config: &Config, output: &str) -> bool {
    config.hooks.error_nudge && !output.is_empty() && !scan_for_errors(output).is_empty()
}

/// The single-line nudge shown to the agent.
pub fn nudge_message() -> &'static str {
    "[agent-memory] Error detected. After fixing it, consider saving the error and fix as a memory."
}
