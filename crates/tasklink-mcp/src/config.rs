//! Launch configuration for a tool server process.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Default request timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 30000;

/// Default interpreter used to run the server script.
pub const DEFAULT_COMMAND: &str = "python";

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_command() -> String {
    DEFAULT_COMMAND.to_string()
}

/// Configuration for a single tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Executable or interpreter to run (e.g., "python", "uv").
    #[serde(default = "default_command")]
    pub command: String,
    /// Script passed as the first argument.
    #[serde(default)]
    pub script: Option<PathBuf>,
    /// Extra arguments passed after the script.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for the server process.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Environment variables layered over the inherited environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Timeout for requests in milliseconds (default: 30000).
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

impl McpServerConfig {
    /// Config for running `script` with the default interpreter.
    pub fn for_script(script: impl Into<PathBuf>) -> Self {
        Self {
            script: Some(script.into()),
            ..Self::default()
        }
    }

    /// Full argument list: the script (if any) followed by `args`.
    pub fn command_args(&self) -> Vec<String> {
        self.script
            .iter()
            .map(|s| s.display().to_string())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

impl Default for McpServerConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            script: None,
            args: Vec::new(),
            working_dir: None,
            env: HashMap::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}
