//! Configuration
//!
//! Loads the studio configuration from `$XDG_CONFIG_HOME/npc-studio/studio.toml`.
//!
//! # Configuration Priority
//!
//! Values are resolved with the following priority (highest first):
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables (`NPC_STUDIO_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [backend]
//! base_url = "http://127.0.0.1:5337"
//! request_timeout_secs = 30
//! idle_timeout_secs = 120   # 0 disables the stall check
//!
//! [defaults]
//! model = "llama3.2"
//! npc = "sibiji"
//! base_dir = "~/.npcsh"
//!
//! [streaming]
//! history_limit = 256
//!
//! [daemon]
//! socket_path = "/run/user/1000/npc-studio/studio.sock"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::streaming::registry::DEFAULT_HISTORY_LIMIT;

/// Default backend address
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5337";
/// Default model
pub const DEFAULT_MODEL: &str = "llama3.2";
/// Default NPC
pub const DEFAULT_NPC: &str = "sibiji";
/// Default working directory, before `~` expansion
pub const DEFAULT_BASE_DIR: &str = "~/.npcsh";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 120;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where the configuration was last changed from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Command-line argument
    Cli,
    /// Environment variable
    Env,
    /// TOML configuration file
    File,
    /// Built-in default
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[backend]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendToml {
    /// Base URL of the npc serve backend
    pub base_url: Option<String>,
    /// Timeout for non-streamed requests
    pub request_timeout_secs: Option<u64>,
    /// Longest silence tolerated inside a streamed response (0 = no limit)
    pub idle_timeout_secs: Option<u64>,
}

/// `[defaults]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsToml {
    /// Model used when a request names none
    pub model: Option<String>,
    /// NPC used when a request names none
    pub npc: Option<String>,
    /// Working directory used when a request names none
    pub base_dir: Option<String>,
}

/// `[streaming]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingToml {
    /// Finished stream sessions to remember
    pub history_limit: Option<usize>,
}

/// `[daemon]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonToml {
    /// Unix socket the daemon listens on
    pub socket_path: Option<String>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioToml {
    /// Backend section
    pub backend: BackendToml,
    /// Defaults section
    pub defaults: DefaultsToml,
    /// Streaming section
    pub streaming: StreamingToml,
    /// Daemon section
    pub daemon: DaemonToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved studio configuration
#[derive(Clone, Debug)]
pub struct StudioConfig {
    /// Backend base URL, without trailing slash
    pub base_url: String,
    /// Timeout for non-streamed requests
    pub request_timeout: Duration,
    /// Stall limit for streamed responses; `None` disables it
    pub idle_timeout: Option<Duration>,
    /// Default model
    pub default_model: String,
    /// Default NPC
    pub default_npc: String,
    /// Default working directory
    pub base_dir: PathBuf,
    /// Finished stream sessions to remember
    pub history_limit: usize,
    /// Daemon socket path; the daemon picks one when unset
    pub socket_path: Option<PathBuf>,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            idle_timeout: Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)),
            default_model: DEFAULT_MODEL.to_string(),
            default_npc: DEFAULT_NPC.to_string(),
            base_dir: expand_home(DEFAULT_BASE_DIR),
            history_limit: DEFAULT_HISTORY_LIMIT,
            socket_path: None,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl StudioConfig {
    /// Create a configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Where the configuration was last changed from
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Check values that cannot be caught by the type system
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for a base URL that is not
    /// http(s) or an empty default model.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "backend base_url must be http(s), got {:?}",
                self.base_url
            )));
        }
        if self.default_model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "default model must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Turn an idle timeout in seconds into a stall limit (0 disables it)
#[must_use]
pub fn idle_timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Expand a leading `~` to the home directory
#[must_use]
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix('~') {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest.trim_start_matches('/')),
            None => PathBuf::from(path),
        },
        None => PathBuf::from(path),
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/npc-studio/studio.toml` (typically
/// `~/.config/npc-studio/studio.toml`).
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("npc-studio").join("studio.toml"))
}

/// Load configuration from the default path, then the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if the
/// resulting configuration is invalid. A missing file is not an error.
pub fn load_config() -> Result<StudioConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path, then the environment
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or if the
/// resulting configuration is invalid.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<StudioConfig, ConfigError> {
    load_config_with_env(path.as_deref(), |key| std::env::var(key).ok())
}

/// Load configuration reading environment variables through `env`
///
/// # Errors
///
/// Same as [`load_config_from_path`].
pub fn load_config_with_env<F>(path: Option<&Path>, env: F) -> Result<StudioConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = StudioConfig::default();

    if let Some(config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.to_path_buf(),
                    source: e,
                })?;

            let toml_config: StudioToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.to_path_buf());
            config.source = ConfigSource::File;

            tracing::info!(path = %config_path.display(), "Loaded configuration from file");
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);
    config.validate()?;
    Ok(config)
}

fn apply_toml_config(config: &mut StudioConfig, toml: &StudioToml) {
    if let Some(url) = &toml.backend.base_url {
        config.base_url = url.trim_end_matches('/').to_string();
    }
    if let Some(secs) = toml.backend.request_timeout_secs {
        config.request_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = toml.backend.idle_timeout_secs {
        config.idle_timeout = idle_timeout_from_secs(secs);
    }

    if let Some(model) = &toml.defaults.model {
        config.default_model.clone_from(model);
    }
    if let Some(npc) = &toml.defaults.npc {
        config.default_npc.clone_from(npc);
    }
    if let Some(dir) = &toml.defaults.base_dir {
        config.base_dir = expand_home(dir);
    }

    if let Some(limit) = toml.streaming.history_limit {
        config.history_limit = limit;
    }

    if let Some(path) = &toml.daemon.socket_path {
        config.socket_path = Some(expand_home(path));
    }
}

fn apply_env_config<F>(config: &mut StudioConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = env("NPC_STUDIO_BASE_URL") {
        config.base_url = url.trim_end_matches('/').to_string();
        config.source = ConfigSource::Env;
    }
    if let Some(secs) = env("NPC_STUDIO_REQUEST_TIMEOUT").and_then(|v| v.parse().ok()) {
        config.request_timeout = Duration::from_secs(secs);
        config.source = ConfigSource::Env;
    }
    if let Some(secs) = env("NPC_STUDIO_IDLE_TIMEOUT").and_then(|v| v.parse().ok()) {
        config.idle_timeout = idle_timeout_from_secs(secs);
        config.source = ConfigSource::Env;
    }
    if let Some(model) = env("NPC_STUDIO_MODEL") {
        config.default_model = model;
        config.source = ConfigSource::Env;
    }
    if let Some(npc) = env("NPC_STUDIO_NPC") {
        config.default_npc = npc;
        config.source = ConfigSource::Env;
    }
    if let Some(dir) = env("NPC_STUDIO_BASE_DIR") {
        config.base_dir = expand_home(&dir);
        config.source = ConfigSource::Env;
    }
    if let Some(limit) = env("NPC_STUDIO_HISTORY_LIMIT").and_then(|v| v.parse().ok()) {
        config.history_limit = limit;
        config.source = ConfigSource::Env;
    }
    if let Some(path) = env("NPC_STUDIO_SOCKET") {
        config.socket_path = Some(expand_home(&path));
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// CLI overrides, applied after [`load_config`]
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Backend base URL
    pub base_url: Option<String>,
    /// Default model
    pub model: Option<String>,
    /// Default NPC
    pub npc: Option<String>,
    /// Idle timeout in seconds (0 disables)
    pub idle_timeout_secs: Option<u64>,
    /// Daemon socket path
    pub socket_path: Option<PathBuf>,
}

impl ConfigOverrides {
    /// Create empty overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the backend base URL
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Override the default model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Override the default NPC
    #[must_use]
    pub fn with_npc(mut self, npc: impl Into<String>) -> Self {
        self.npc = Some(npc.into());
        self
    }

    /// Override the idle timeout
    #[must_use]
    pub fn with_idle_timeout_secs(mut self, secs: u64) -> Self {
        self.idle_timeout_secs = Some(secs);
        self
    }

    /// Override the daemon socket path
    #[must_use]
    pub fn with_socket_path(mut self, path: PathBuf) -> Self {
        self.socket_path = Some(path);
        self
    }

    /// Apply these overrides to `config`
    pub fn apply(&self, config: &mut StudioConfig) {
        if self.base_url.is_some()
            || self.model.is_some()
            || self.npc.is_some()
            || self.idle_timeout_secs.is_some()
            || self.socket_path.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(url) = &self.base_url {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(model) = &self.model {
            config.default_model.clone_from(model);
        }
        if let Some(npc) = &self.npc {
            config.default_npc.clone_from(npc);
        }
        if let Some(secs) = self.idle_timeout_secs {
            config.idle_timeout = idle_timeout_from_secs(secs);
        }
        if let Some(path) = &self.socket_path {
            config.socket_path = Some(path.clone());
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
