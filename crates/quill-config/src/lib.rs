//! Layered configuration for the Quill client.
//!
//! Settings are resolved with precedence:
//! CLI flags > environment variables > `~/.quill/config.toml` > defaults

use quill_mcp::McpServerConfig;
use quill_types::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub use quill_api::DEFAULT_BASE_URL as DEFAULT_API_BASE_URL;

/// The default model to use.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";

/// The default max tokens for a chat response.
pub const DEFAULT_MAX_TOKENS: u32 = 8192;

/// Name of the tool server executable.
pub const SERVER_BINARY: &str = "quill-server";

/// Resolved configuration for a Quill session.
#[derive(Debug, Clone)]
pub struct QuillConfig {
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub api_base_url: String,
    /// Model used to answer the server's sampling requests.
    pub sampling_model: String,
    /// Display name of the tool server.
    pub server_name: String,
    pub server: McpServerConfig,
    /// Advertise the sampling capability to the server.
    pub sampling: bool,
    pub config_dir: PathBuf,
}

/// Settings that can be read from a TOML config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub client: ClientSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiSettings {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub base_url: Option<String>,
    pub sampling_model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerSettings {
    pub name: Option<String>,
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientSettings {
    pub sampling: Option<bool>,
}

/// CLI overrides that take highest precedence.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub server_command: Option<String>,
    /// Replaces the configured server arguments when non-empty.
    pub server_args: Vec<String>,
    pub no_sampling: bool,
}

impl QuillConfig {
    /// Load configuration from all sources, applying precedence rules.
    pub fn load(overrides: CliOverrides) -> Result<Self, ConfigError> {
        let config_dir = config_dir();
        let settings = load_settings_file(&config_dir.join("config.toml"))?;
        Self::resolve(overrides, settings, |key| std::env::var(key).ok(), config_dir)
    }

    /// Merge the layers. `env` looks up an environment variable.
    pub fn resolve(
        overrides: CliOverrides,
        settings: SettingsFile,
        env: impl Fn(&str) -> Option<String>,
        config_dir: PathBuf,
    ) -> Result<Self, ConfigError> {
        let SettingsFile {
            api,
            server,
            client,
        } = settings;

        let api_key = overrides
            .api_key
            .or_else(|| env("ANTHROPIC_API_KEY"))
            .or(api.api_key)
            .ok_or_else(|| ConfigError::MissingKey {
                key: "api_key (set ANTHROPIC_API_KEY or add to ~/.quill/config.toml)".into(),
            })?;

        let model = overrides
            .model
            .or_else(|| env("QUILL_MODEL"))
            .or(api.model)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let max_tokens = overrides
            .max_tokens
            .or(api.max_tokens)
            .unwrap_or(DEFAULT_MAX_TOKENS);
        if max_tokens == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_tokens".into(),
                message: "must be greater than zero".into(),
            });
        }

        let api_base_url = env("ANTHROPIC_API_BASE_URL")
            .or(api.base_url)
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());

        let sampling_model = api.sampling_model.unwrap_or_else(|| model.clone());

        let command = overrides
            .server_command
            .or_else(|| env("QUILL_SERVER_COMMAND"))
            .or(server.command)
            .unwrap_or_else(default_server_command);
        if command.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "server.command".into(),
                message: "must not be empty".into(),
            });
        }
        let args = if overrides.server_args.is_empty() {
            server.args.unwrap_or_default()
        } else {
            overrides.server_args
        };
        let mut server_config = McpServerConfig::new(command).with_args(args);
        server_config.env = server.env;
        if let Some(timeout_ms) = server.timeout_ms {
            server_config.timeout_ms = timeout_ms;
        }

        Ok(QuillConfig {
            api_key,
            model,
            max_tokens,
            api_base_url,
            sampling_model,
            server_name: server.name.unwrap_or_else(|| SERVER_BINARY.to_string()),
            server: server_config,
            sampling: !overrides.no_sampling && client.sampling.unwrap_or(true),
            config_dir,
        })
    }
}

/// Get the Quill config directory path (~/.quill/).
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("QUILL_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".quill")
}

/// `quill-server` next to the running executable, else whatever is on `PATH`.
pub fn default_server_command() -> String {
    let binary = format!("{SERVER_BINARY}{}", std::env::consts::EXE_SUFFIX);
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&binary)))
        .filter(|path| path.is_file())
        .map(|path| path.to_string_lossy().into_owned())
        .unwrap_or_else(|| SERVER_BINARY.to_string())
}

/// Read a TOML settings file. A missing file yields defaults.
pub fn load_settings_file(path: &Path) -> Result<SettingsFile, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SettingsFile::default()),
        Err(e) => {
            tracing::warn!("Failed to read {}: {e}", path.display());
            Ok(SettingsFile::default())
        }
    }
}
