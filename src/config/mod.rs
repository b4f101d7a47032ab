// Required external crates for configuration management and serialization
use serde::Deserialize;
use std::path::{Path, PathBuf};
use config::{Config, ConfigError, Environment, File};

/// Configuration for the local model cache
#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Root directory holding one subdirectory per task
    pub directory: PathBuf,
    /// Optional staging directory for the hub client's own cache
    #[serde(default)]
    pub hub_cache: Option<PathBuf>,
}

/// Configuration for the remote model hub
#[derive(Debug, Deserialize, Clone, Default)]
pub struct HubConfig {
    /// Access token for gated or private repositories
    #[serde(default)]
    pub token: Option<String>,
    /// Show download progress bars
    #[serde(default)]
    pub progress: bool,
}

/// Configuration for model inference parameters
#[derive(Debug, Deserialize, Clone)]
pub struct InferenceConfig {
    /// Run on the first CUDA/Metal device when the build supports it
    pub use_gpu: bool,
    /// Sampling temperature for generation tasks; 0.0 means greedy decoding
    pub temperature: f64,
    /// Upper bound on `max_new_tokens` requested by callers
    pub max_tokens: usize,
    /// Maximum number of input tokens fed to a model
    pub context_size: usize,
    /// Sampling seed; a random seed is drawn when absent
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Configuration for the HTTP server
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

/// Configuration for application logging
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Optional log directory; logs go to stderr when unset
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Main settings struct that contains all configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Model cache settings
    pub cache: CacheConfig,
    /// Hub access settings
    #[serde(default)]
    pub hub: HubConfig,
    /// Inference-related settings
    pub inference: InferenceConfig,
    /// Server-related settings
    pub server: ServerConfig,
    /// Logging-related settings
    pub logging: LoggingConfig,
}

/// Implementation for loading and parsing configuration
impl Settings {
    /// Creates a new Settings instance from the `config` directory under the
    /// current working directory.
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir = std::env::current_dir()
            .map_err(|e| ConfigError::Message(
                format!("Failed to get current directory: {}", e)
            ))?
            .join("config");

        Self::load(&config_dir)
    }

    /// Loads config from multiple sources in the following order of
    /// precedence (highest to lowest):
    /// 1. Environment variables prefixed with HFPIPE__ (e.g. HFPIPE__SERVER__PORT)
    /// 2. Local config file (local.toml) if present
    /// 3. Default config file (default.toml)
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        if !config_dir.exists() {
            return Err(ConfigError::Message(
                format!("Config directory not found at: {}", config_dir.display())
            ));
        }

        let default_config = config_dir.join("default.toml");
        if !default_config.exists() {
            return Err(ConfigError::Message(
                format!("Default configuration file not found at: {}", default_config.display())
            ));
        }

        let local_config = config_dir.join("local.toml");

        let default_config_path = default_config.to_string_lossy();
        let local_config_path = local_config.to_string_lossy();

        let settings = Config::builder()
            .add_source(File::with_name(&default_config_path))
            .add_source(File::with_name(&local_config_path).required(false))
            .add_source(Environment::with_prefix("HFPIPE").prefix_separator("__").separator("__"))
            .build()?
            .try_deserialize::<Settings>()?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<(), ConfigError> {
        // Create cache directory if it doesn't exist
        if !self.cache.directory.exists() {
            std::fs::create_dir_all(&self.cache.directory).map_err(|e| {
                ConfigError::Message(format!(
                    "Failed to create model cache directory at {}: {}",
                    self.cache.directory.display(), e
                ))
            })?;
        }

        if !(0.0..=2.0).contains(&self.inference.temperature) {
            return Err(ConfigError::Message(
                format!("Temperature must be between 0.0 and 2.0, got: {}", self.inference.temperature)
            ));
        }

        if self.inference.max_tokens == 0 {
            return Err(ConfigError::Message(
                "max_tokens must be greater than 0".to_string()
            ));
        }

        if self.inference.context_size == 0 {
            return Err(ConfigError::Message(
                "context_size must be greater than 0".to_string()
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigError::Message(
                "Port must be between 1 and 65535, got: 0".to_string()
            ));
        }

        match self.logging.level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => Ok(()),
            _ => Err(ConfigError::Message(
                format!("Invalid logging level: {}. Must be one of: error, warn, info, debug, trace",
                    self.logging.level)
            )),
        }?;

        if let Some(log_dir) = &self.logging.file {
            if !log_dir.exists() {
                std::fs::create_dir_all(log_dir).map_err(|e| {
                    ConfigError::Message(format!(
                        "Failed to create log directory at {}: {}",
                        log_dir.display(), e
                    ))
                })?;
            }
        }

        Ok(())
    }

    /// Base URL of the configured server, used by the CLI client commands
    pub fn server_url(&self) -> String {
        format!("http://{}:{}", self.server.host, self.server.port)
    }
}
