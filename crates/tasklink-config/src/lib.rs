//! Multi-tier TOML configuration for Tasklink.
//!
//! Reads configuration from multiple sources with precedence:
//! CLI flags > env vars > config file > defaults

pub mod error;

pub use error::ConfigError;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tasklink_mcp::McpServerConfig;

/// Name the server is known by in logs.
pub const DEFAULT_SERVER_NAME: &str = "tasks";

/// Resolved configuration for a Tasklink session.
#[derive(Debug, Clone)]
pub struct TasklinkConfig {
    pub server_name: String,
    pub server: McpServerConfig,
    pub username: Option<String>,
}

/// Settings that can be read from a TOML config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub user: UserSettings,
}

/// `[server]` section of the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerSettings {
    pub name: Option<String>,
    pub command: Option<String>,
    pub script: Option<PathBuf>,
    #[serde(default)]
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub timeout_ms: Option<u64>,
}

/// `[user]` section of the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserSettings {
    pub username: Option<String>,
}

/// CLI overrides that take highest precedence.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub command: Option<String>,
    pub script: Option<PathBuf>,
    pub working_dir: Option<PathBuf>,
    pub username: Option<String>,
    pub timeout_ms: Option<u64>,
}

impl TasklinkConfig {
    /// Load configuration from all sources, applying precedence rules.
    ///
    /// Precedence (highest to lowest):
    /// 1. CLI flags
    /// 2. Environment variables (`TASKLINK_SERVER_COMMAND`,
    ///    `TASKLINK_SERVER_SCRIPT`, `TASKLINK_USERNAME`)
    /// 3. Config file (~/.tasklink/config.toml)
    /// 4. Defaults
    pub fn load(overrides: CliOverrides) -> Result<Self, ConfigError> {
        let config_dir = config_dir();
        let settings = load_settings_file(&config_dir.join("config.toml"));
        Self::resolve(settings, overrides, &config_dir, |key| std::env::var(key).ok())
    }

    /// Merge already-read sources. `env` looks up environment variables.
    ///
    /// Relative paths from the config file are taken relative to
    /// `config_dir`; those from the CLI or environment are left as given.
    pub fn resolve(
        settings: SettingsFile,
        overrides: CliOverrides,
        config_dir: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let defaults = McpServerConfig::default();
        let file = settings.server;

        let command = overrides
            .command
            .or_else(|| env("TASKLINK_SERVER_COMMAND"))
            .or(file.command)
            .unwrap_or(defaults.command);

        let script = overrides
            .script
            .or_else(|| env("TASKLINK_SERVER_SCRIPT").map(PathBuf::from))
            .or_else(|| file.script.map(|p| config_dir.join(p)))
            .ok_or_else(|| ConfigError::MissingKey {
                key: "server.script (set TASKLINK_SERVER_SCRIPT or add to ~/.tasklink/config.toml)"
                    .into(),
            })?;

        let timeout_ms = overrides
            .timeout_ms
            .or(file.timeout_ms)
            .unwrap_or(defaults.timeout_ms);
        if timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "server.timeout_ms".into(),
                message: "must be greater than zero".into(),
            });
        }

        let username = overrides
            .username
            .or_else(|| env("TASKLINK_USERNAME"))
            .or(settings.user.username)
            .filter(|u| !u.trim().is_empty());

        Ok(TasklinkConfig {
            server_name: file
                .name
                .unwrap_or_else(|| DEFAULT_SERVER_NAME.to_string()),
            server: McpServerConfig {
                command,
                script: Some(script),
                args: file.args,
                working_dir: overrides
                    .working_dir
                    .or_else(|| file.working_dir.map(|p| config_dir.join(p))),
                env: file.env,
                timeout_ms,
            },
            username,
        })
    }

    /// The configured username, or an error naming where to set it.
    pub fn require_username(&self) -> Result<&str, ConfigError> {
        self.username
            .as_deref()
            .ok_or_else(|| ConfigError::MissingKey {
                key: "user.username (pass --user or set TASKLINK_USERNAME)".into(),
            })
    }
}

/// Get the Tasklink config directory path (~/.tasklink/).
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TASKLINK_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tasklink")
}

/// Read and parse a settings file. A missing file is `Ok(None)`.
pub fn read_settings_file(path: &Path) -> Result<Option<SettingsFile>, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ConfigError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            });
        }
    };
    toml::from_str(&content)
        .map(Some)
        .map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
}

/// Load a settings file, returning defaults on any error.
fn load_settings_file(path: &Path) -> SettingsFile {
    match read_settings_file(path) {
        Ok(settings) => settings.unwrap_or_default(),
        Err(e) => {
            tracing::warn!("{e}");
            SettingsFile::default()
        }
    }
}
