//! Key-pool configuration.
//!
//! `keys.toml` names the credentials and the generation knobs:
//!
//! ```toml
//! api_keys = ["sk-alpha", "sk-beta"]
//! api_base = "https://proxy.internal/v1"
//! request_timeout_secs = 90
//!
//! [model]
//! name = "gpt-4o-mini"
//! temperature = 0.2
//! ```
//!
//! `OPENAI_API_KEY` supplies a one-key pool when the file lists none or is
//! absent entirely, so ad-hoc runs need no file on disk.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::{ApiKey, Error, Result};
use completion::ModelProfile;
use serde::Deserialize;

/// Environment variable naming an alternate config path.
pub const CONFIG_PATH_ENV: &str = "PROMPTPOOL_CONFIG";

/// Environment variable consulted when the config lists no keys.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

const DEFAULT_CONFIG_PATH: &str = "keys.toml";

fn default_request_timeout() -> u64 {
    90
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeyConfig {
    /// Credentials to pool. May be empty when `OPENAI_API_KEY` is set.
    #[serde(default)]
    pub api_keys: Vec<String>,

    /// Endpoint override; the client defaults to the public OpenAI base.
    #[serde(default)]
    pub api_base: Option<String>,

    /// Model id and generation parameters.
    #[serde(default)]
    pub model: ModelProfile,

    /// Per-request timeout handed to the HTTP client.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            api_base: None,
            model: ModelProfile::default(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl KeyConfig {
    /// Load the config at `path`.
    ///
    /// A missing file is treated as an empty config, which still validates
    /// when `OPENAI_API_KEY` provides a key.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<KeyConfig>(&contents)?
        } else {
            KeyConfig::default()
        };

        // File keys win; the env var only backfills an empty list.
        if config.api_keys.is_empty() {
            config
                .api_keys
                .extend(env::var(API_KEY_ENV).ok().filter(|key| !key.trim().is_empty()));
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.api_keys.is_empty() {
            return Err(Error::Config(format!(
                "no API keys: set api_keys in the config file or export {API_KEY_ENV}"
            )));
        }
        if self.api_keys.iter().any(|key| key.trim().is_empty()) {
            return Err(Error::Config(
                "api_keys entries must not be blank".to_string(),
            ));
        }
        if let Some(base) = &self.api_base {
            if !base.starts_with("http://") && !base.starts_with("https://") {
                return Err(Error::Config(format!(
                    "api_base must be an http(s) URL, got {base:?}"
                )));
            }
        }
        if self.model.name.trim().is_empty() {
            return Err(Error::Config("model.name must not be empty".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config(
                "request_timeout_secs must be nonzero".to_string(),
            ));
        }
        Ok(())
    }

    /// Credentials as pool-ready keys, trimmed of stray whitespace.
    pub fn keys(&self) -> Vec<ApiKey> {
        self.api_keys
            .iter()
            .map(|token| ApiKey::new(token.trim()))
            .collect()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Config path precedence: `--config` flag, then `PROMPTPOOL_CONFIG`, then
/// `keys.toml` in the working directory.
pub fn resolve_path(flag: Option<&Path>) -> PathBuf {
    if let Some(path) = flag {
        return path.to_path_buf();
    }
    if let Ok(path) = env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    PathBuf::from(DEFAULT_CONFIG_PATH)
}
