use std::{env, fs, io, path::PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// The assistant's standing instructions, used when the config does not
/// override them.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Endroid, a witty and \
helpful assistant. Reference past conversation details naturally. Be \
concise, and use markdown for clarity.";

const DEFAULT_CONFIG: &str = r#"# endroid configuration.

default_model = "gemini-2.0-flash"

# Attempt budget and wait (milliseconds) between retries of one request.
max_attempts = 6
retry_delay_ms = 750

# Per-call timeout, seconds.
request_timeout_secs = 30

# Prepend encyclopedia/weather context when the message asks for it.
enrichment = true

# Ask the model to ground answers in web search results.
grounding = false

# system_prompt = "You are Endroid..."
# keys_path = "/path/to/keys.txt"
# history_path = "/path/to/history.txt"
"#;

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to locate project directories.")]
    ProjectDirs,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

#[non_exhaustive]
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub default_model: String,
    pub system_prompt: Option<String>,
    pub keys_path: Option<PathBuf>,
    pub history_path: Option<PathBuf>,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub enrichment: bool,
    pub grounding: bool,
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            default_model: "gemini-2.0-flash".to_owned(),
            system_prompt: None,
            keys_path: None,
            history_path: None,
            max_attempts: 6,
            retry_delay_ms: 750,
            request_timeout_secs: 30,
            enrichment: true,
            grounding: false,
        }
    }
}

#[non_exhaustive]
pub struct ConfigManager {
    pub config_path: PathBuf,
}

impl ConfigManager {
    #[inline]
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir = dirs::config_dir()
            .ok_or(ConfigError::ProjectDirs)?
            .join("endroid");

        fs::create_dir_all(&config_dir)?;

        Ok(Self {
            config_path: config_dir.join("config.toml"),
        })
    }

    #[inline]
    #[must_use]
    pub const fn at(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    #[inline]
    pub fn init_default_config(&self) -> Result<(), ConfigError> {
        if !self.config_path.exists() {
            fs::write(&self.config_path, DEFAULT_CONFIG)?;
        }
        Ok(())
    }

    /// Load the config file, or defaults when it does not exist yet.
    #[inline]
    pub fn load(&self) -> Result<Config, ConfigError> {
        if !self.config_path.exists() {
            return Ok(Config::default());
        }
        let raw = fs::read_to_string(&self.config_path)?;
        Ok(toml::from_str(&raw)?)
    }
}

/// Raw newline-delimited key material plus where it came from, for
/// diagnostics. Precedence: `ENDROID_API_KEYS` (inline), `ENDROID_KEYS`
/// (path), the configured path, then `keys.txt` next to the config file.
/// A missing source yields an empty string, which the pool turns into
/// fallback mode.
#[inline]
#[must_use]
pub fn load_keys(config: &Config) -> (String, &'static str) {
    if let Ok(inline) = env::var("ENDROID_API_KEYS") {
        return (inline, "ENDROID_API_KEYS environment variable");
    }

    if let Ok(env_path) = env::var("ENDROID_KEYS") {
        return (
            fs::read_to_string(env_path).unwrap_or_default(),
            "ENDROID_KEYS environment variable",
        );
    }

    if let Some(ref path) = config.keys_path {
        return (
            fs::read_to_string(path).unwrap_or_default(),
            "configured keys_path",
        );
    }

    let default_path = dirs::config_dir()
        .map(|dir| dir.join("endroid").join("keys.txt"));

    match default_path {
        Some(path) => (
            fs::read_to_string(path).unwrap_or_default(),
            "default keys.txt",
        ),
        None => (String::new(), "no key source"),
    }
}

#[cfg(test)]
mod tests {
    #![expect(
        clippy::unwrap_used,
        reason = "Tests should panic on failure."
    )]

    use super::*;

    #[test]
    fn default_config_parses() {
        let config: Config = toml::from_str(DEFAULT_CONFIG).unwrap();

        assert_eq!(config.default_model, "gemini-2.0-flash");
        assert_eq!(config.max_attempts, 6);
        assert_eq!(config.retry_delay_ms, 750);
        assert!(config.enrichment);
        assert!(!config.grounding);
        assert!(config.keys_path.is_none());
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: Config =
            toml::from_str(r#"default_model = "gemini-1.5-pro""#).unwrap();

        assert_eq!(config.default_model, "gemini-1.5-pro");
        assert_eq!(config.max_attempts, 6);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn empty_config_is_all_defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_eq!(config.default_model, "gemini-2.0-flash");
        assert!(config.system_prompt.is_none());
    }
}
