//! Configuration management for figdl.
//!
//! Parses `figdl.toml` configuration files with serde and provides
//! auto-discovery of config files in parent directories.
//!
//! CLI settings can be applied during load via [`CliSettings`]. Secrets are
//! never read from `figdl.toml`; see [`Credentials`].
//!
//! ## Environment Variable Expansion
//!
//! String configuration values support environment variable expansion:
//!
//! - `${VAR}` - expands to the value of VAR, errors if unset
//! - `${VAR:-default}` - expands to VAR if set, otherwise uses default
//!
//! Expanded fields:
//! - `api.base_url`
//! - `export.output_dir`
//! - `compression.tinify_url`
//! - `compression.relay_url`

mod credentials;
mod expand;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

pub use credentials::{
    Credentials, EnvSources, FIGMA_TOKEN_VARS, TINIFY_KEY_VAR, parse_env_file,
};

/// Configuration filename to search for.
const CONFIG_FILENAME: &str = "figdl.toml";

/// Image formats accepted in `export.format`.
const FORMATS: [&str; 5] = ["png", "jpg", "jpeg", "svg", "pdf"];

/// CLI settings that override configuration file values.
///
/// All fields are optional. Only non-None values override the loaded config.
#[derive(Debug, Default)]
pub struct CliSettings {
    /// Override output directory.
    pub output_dir: Option<PathBuf>,
    /// Override render scale.
    pub scale: Option<f64>,
    /// Override image format.
    pub format: Option<String>,
    /// Override initial batch size.
    pub batch_size: Option<usize>,
    /// Override compression toggle.
    pub compress: Option<bool>,
    /// Override compression backend.
    pub backend: Option<CompressionBackend>,
    /// Override relay URL.
    pub relay_url: Option<String>,
}

/// Application configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Figma API settings.
    pub api: ApiConfig,
    /// Retry settings.
    pub retry: RetryConfig,
    /// Export settings (output path as a relative string from TOML).
    export: ExportConfigRaw,
    /// Compression settings.
    pub compression: CompressionConfig,

    /// Resolved export configuration (set after loading).
    #[serde(skip)]
    pub export_resolved: ExportSettings,
    /// Path to the config file (set after loading).
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self::default_with_base(Path::new("."))
    }
}

/// Figma API configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// REST API base URL.
    pub base_url: String,
    /// Timeout for render and download requests, in seconds.
    pub timeout_secs: u64,
    /// Timeout for the document fetch, in seconds.
    pub document_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.figma.com/v1".to_owned(),
            timeout_secs: 120,
            document_timeout_secs: 300,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts for render and download requests.
    pub max_attempts: u32,
    /// Attempts for the document fetch.
    pub document_max_attempts: u32,
    /// Linear backoff unit, in milliseconds.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            document_max_attempts: 4,
            base_delay_ms: 10_000,
        }
    }
}

/// Raw export configuration as parsed from TOML.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ExportConfigRaw {
    output_dir: Option<String>,
    scale: Option<f64>,
    format: Option<String>,
    batch_size: Option<usize>,
    batch_delay_ms: Option<u64>,
    compress: Option<bool>,
}

/// Resolved export configuration with an absolute output path.
#[derive(Debug)]
pub struct ExportSettings {
    /// Root directory for exported files.
    pub output_dir: PathBuf,
    /// Render scale.
    pub scale: f64,
    /// Image format name (`png`, `jpg`, `svg`, `pdf`).
    pub format: String,
    /// Initial number of nodes per render request.
    pub batch_size: usize,
    /// Pause after each render request, in milliseconds.
    pub batch_delay_ms: u64,
    /// Whether to compress downloaded images.
    pub compress: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            scale: 3.0,
            format: "png".to_owned(),
            batch_size: 5,
            batch_delay_ms: 5_000,
            compress: true,
        }
    }
}

/// Compression service to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionBackend {
    /// Tinify (TinyPNG) API, needs `TINYPNG_API_KEY`.
    #[default]
    Tinify,
    /// Local relay that forwards bytes to a compression service.
    Relay,
}

impl fmt::Display for CompressionBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tinify => f.write_str("tinify"),
            Self::Relay => f.write_str("relay"),
        }
    }
}

/// Compression configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Backend used when compression is enabled.
    pub backend: CompressionBackend,
    /// Tinify shrink endpoint.
    pub tinify_url: String,
    /// Relay endpoint.
    pub relay_url: String,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            backend: CompressionBackend::Tinify,
            tinify_url: "https://api.tinify.com/shrink".to_owned(),
            relay_url: "http://127.0.0.1:8765/compress".to_owned(),
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File not found.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error.
    #[error("Configuration error: {0}")]
    Validation(String),
    /// Environment variable error during expansion.
    #[error("Environment variable error in {field}: {message}")]
    EnvVar {
        /// Config field path (e.g., "`compression.relay_url`").
        field: String,
        /// Error message (e.g., "${`RELAY_HOST`} not set").
        message: String,
    },
}

/// Require a URL field to use http:// or https:// scheme.
fn require_http_url(url: &str, field: &str) -> Result<(), ConfigError> {
    if url.is_empty() {
        return Err(ConfigError::Validation(format!("{field} cannot be empty")));
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::Validation(format!(
            "{field} must start with http:// or https://"
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from file with optional CLI settings.
    ///
    /// If `config_path` is provided, loads from that file.
    /// Otherwise, searches for `figdl.toml` in current directory and parents.
    ///
    /// CLI settings are applied after loading and path resolution; the result
    /// is validated last.
    ///
    /// # Errors
    ///
    /// Returns error if explicit `config_path` doesn't exist, parsing or
    /// expansion fails, or the final values are invalid.
    pub fn load(
        config_path: Option<&Path>,
        cli_settings: Option<&CliSettings>,
    ) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Self::load_from_file(path)?
        } else if let Some(discovered) = Self::discover_config() {
            Self::load_from_file(&discovered)?
        } else {
            Self::default_with_cwd()
        };

        if let Some(settings) = cli_settings {
            config.apply_cli_settings(settings);
        }
        config.validate()?;

        Ok(config)
    }

    /// Apply CLI settings to the configuration.
    fn apply_cli_settings(&mut self, settings: &CliSettings) {
        let export = &mut self.export_resolved;
        if let Some(output_dir) = &settings.output_dir {
            export.output_dir.clone_from(output_dir);
        }
        if let Some(scale) = settings.scale {
            export.scale = scale;
        }
        if let Some(format) = &settings.format {
            export.format.clone_from(format);
        }
        if let Some(batch_size) = settings.batch_size {
            export.batch_size = batch_size;
        }
        if let Some(compress) = settings.compress {
            export.compress = compress;
        }
        if let Some(backend) = settings.backend {
            self.compression.backend = backend;
        }
        if let Some(relay_url) = &settings.relay_url {
            self.compression.relay_url.clone_from(relay_url);
        }
    }

    /// Search for config file in current directory and parents.
    fn discover_config() -> Option<PathBuf> {
        let cwd = std::env::current_dir().ok()?;
        discover_from(&cwd)
    }

    /// Create default config with paths relative to current working directory.
    fn default_with_cwd() -> Self {
        let cwd = std::env::current_dir().unwrap_or_default();
        Self::default_with_base(&cwd)
    }

    /// Create default config with paths relative to given base directory.
    fn default_with_base(base: &Path) -> Self {
        Self {
            api: ApiConfig::default(),
            retry: RetryConfig::default(),
            export: ExportConfigRaw::default(),
            compression: CompressionConfig::default(),
            export_resolved: ExportSettings {
                output_dir: base.join("output"),
                ..ExportSettings::default()
            },
            config_path: None,
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;

        // Expand environment variables before path resolution
        config.expand_env_vars()?;

        let config_dir = path.parent().unwrap_or(Path::new("."));
        config.resolve(config_dir);
        config.config_path = Some(path.to_path_buf());

        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if any validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_http_url(&self.api.base_url, "api.base_url")?;
        if self.api.timeout_secs == 0 || self.api.document_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "api timeouts must be greater than 0".to_owned(),
            ));
        }

        if self.retry.max_attempts == 0 || self.retry.document_max_attempts == 0 {
            return Err(ConfigError::Validation(
                "retry attempts must be at least 1".to_owned(),
            ));
        }

        let export = &self.export_resolved;
        if !(0.01..=4.0).contains(&export.scale) {
            return Err(ConfigError::Validation(format!(
                "export.scale must be between 0.01 and 4, got {}",
                export.scale
            )));
        }
        if export.batch_size == 0 {
            return Err(ConfigError::Validation(
                "export.batch_size must be at least 1".to_owned(),
            ));
        }
        if !FORMATS.contains(&export.format.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::Validation(format!(
                "export.format must be one of png, jpg, svg, pdf, got '{}'",
                export.format
            )));
        }

        match self.compression.backend {
            CompressionBackend::Tinify => {
                require_http_url(&self.compression.tinify_url, "compression.tinify_url")?;
            }
            CompressionBackend::Relay => {
                require_http_url(&self.compression.relay_url, "compression.relay_url")?;
            }
        }

        Ok(())
    }

    /// Expand environment variable references in configuration strings.
    fn expand_env_vars(&mut self) -> Result<(), ConfigError> {
        self.api.base_url = expand::expand_env(&self.api.base_url, "api.base_url")?;

        if let Some(ref output_dir) = self.export.output_dir {
            self.export.output_dir = Some(expand::expand_env(output_dir, "export.output_dir")?);
        }

        self.compression.tinify_url =
            expand::expand_env(&self.compression.tinify_url, "compression.tinify_url")?;
        self.compression.relay_url =
            expand::expand_env(&self.compression.relay_url, "compression.relay_url")?;

        Ok(())
    }

    /// Resolve raw export values, making `output_dir` relative to the config
    /// directory.
    fn resolve(&mut self, config_dir: &Path) {
        let defaults = ExportSettings::default();
        let raw = &self.export;
        self.export_resolved = ExportSettings {
            output_dir: config_dir.join(raw.output_dir.as_deref().unwrap_or("output")),
            scale: raw.scale.unwrap_or(defaults.scale),
            format: raw.format.clone().unwrap_or(defaults.format),
            batch_size: raw.batch_size.unwrap_or(defaults.batch_size),
            batch_delay_ms: raw.batch_delay_ms.unwrap_or(defaults.batch_delay_ms),
            compress: raw.compress.unwrap_or(defaults.compress),
        };
    }
}

/// Find `figdl.toml` in `start` or its parents.
fn discover_from(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        let candidate = current.join(CONFIG_FILENAME);
        if candidate.exists() {
            return Some(candidate);
        }
        if !current.pop() {
            return None;
        }
    }
}
