//! Access token resolution.
//!
//! Each secret is looked up in priority order: CLI flag, explicit env file,
//! `.env` in the working directory, then the process environment.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use crate::ConfigError;

/// Figma token variables, in lookup order.
pub const FIGMA_TOKEN_VARS: [&str; 2] = ["FIGMA_ACCESS_TOKEN", "FIGMA_TOKEN"];

/// Tinify API key variable.
pub const TINIFY_KEY_VAR: &str = "TINYPNG_API_KEY";

/// Parse `.env` content into key/value pairs.
///
/// Accepts `KEY=value` lines; blank lines and `#` comments are skipped,
/// surrounding whitespace is trimmed and matching single or double quotes
/// around the value are removed. Later keys override earlier ones.
pub fn parse_env_file(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .filter_map(|(key, value)| {
            let key = key.trim();
            let key = key.strip_prefix("export ").map_or(key, str::trim);
            (!key.is_empty()).then(|| (key.to_owned(), unquote(value.trim()).to_owned()))
        })
        .collect()
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|v| v.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

/// Env-file sources consulted before the process environment.
#[derive(Debug, Default)]
pub struct EnvSources {
    explicit: HashMap<String, String>,
    local: HashMap<String, String>,
}

impl EnvSources {
    /// Load the explicit env file (if any) and `cwd/.env` (if present).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if `env_file` is given but missing,
    /// or [`ConfigError::Io`] if a file cannot be read.
    pub fn load(env_file: Option<&Path>, cwd: &Path) -> Result<Self, ConfigError> {
        let explicit = match env_file {
            Some(path) if !path.exists() => return Err(ConfigError::NotFound(path.to_path_buf())),
            Some(path) => parse_env_file(&std::fs::read_to_string(path)?),
            None => HashMap::new(),
        };

        let local_path = cwd.join(".env");
        let local = if local_path.is_file() {
            parse_env_file(&std::fs::read_to_string(&local_path)?)
        } else {
            HashMap::new()
        };

        Ok(Self { explicit, local })
    }

    /// Look up `key` in the env files, then the process environment.
    pub fn lookup(&self, key: &str) -> Option<String> {
        self.explicit
            .get(key)
            .or_else(|| self.local.get(key))
            .cloned()
            .or_else(|| std::env::var(key).ok())
            .filter(|value| !value.is_empty())
    }

    fn lookup_any(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| self.lookup(key))
    }
}

/// Resolved secrets.
#[derive(Default)]
pub struct Credentials {
    /// Figma personal access token.
    pub figma_token: Option<String>,
    /// Tinify API key.
    pub tinify_key: Option<String>,
}

impl Credentials {
    /// Resolve secrets, preferring CLI values over `sources`.
    pub fn resolve(
        cli_token: Option<&str>,
        cli_tinify_key: Option<&str>,
        sources: &EnvSources,
    ) -> Self {
        let from_cli = |value: Option<&str>| value.filter(|v| !v.is_empty()).map(str::to_owned);
        Self {
            figma_token: from_cli(cli_token).or_else(|| sources.lookup_any(&FIGMA_TOKEN_VARS)),
            tinify_key: from_cli(cli_tinify_key).or_else(|| sources.lookup(TINIFY_KEY_VAR)),
        }
    }

    /// The Figma token, or a validation error explaining where to set it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if no token was found.
    pub fn require_figma_token(&self) -> Result<&str, ConfigError> {
        self.figma_token.as_deref().ok_or_else(|| {
            ConfigError::Validation(format!(
                "Figma access token not set (use --token, or set {} in the environment or .env)",
                FIGMA_TOKEN_VARS[0]
            ))
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |value: &Option<String>| value.as_ref().map(|_| "***");
        f.debug_struct("Credentials")
            .field("figma_token", &redact(&self.figma_token))
            .field("tinify_key", &redact(&self.tinify_key))
            .finish()
    }
}
