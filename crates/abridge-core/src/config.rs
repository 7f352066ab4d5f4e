//! Configuration types for the abridge runtime

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory used as the HuggingFace cache for downloaded models
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,

    /// Pre-downloaded model directory; skips the hub entirely when set
    #[serde(default)]
    pub model_dir: Option<PathBuf>,

    /// Preferred device ("cuda", "metal", "cpu"); auto-detected when unset
    #[serde(default)]
    pub device: Option<String>,

    /// Weight dtype requested from the device profile
    #[serde(default = "default_dtype")]
    pub dtype: String,

    /// Maximum number of input tokens fed to the encoder
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,

    /// Load the model at start-up instead of on the first request
    #[serde(default)]
    pub preload: bool,

    /// Maximum number of summarisations running at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
            model_dir: None,
            device: None,
            dtype: default_dtype(),
            max_input_tokens: default_max_input_tokens(),
            preload: false,
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl EngineConfig {
    /// Build a configuration from `ABRIDGE_*` environment variables on top of the defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = env_non_empty("ABRIDGE_MODEL_DIR") {
            config.model_dir = Some(PathBuf::from(dir));
        }
        if let Some(device) = env_non_empty("ABRIDGE_DEVICE") {
            config.device = Some(device.to_lowercase());
        }
        if let Some(dtype) = env_non_empty("ABRIDGE_DTYPE") {
            config.dtype = dtype.to_lowercase();
        }
        if let Some(raw) = env_non_empty("ABRIDGE_PRELOAD") {
            config.preload = parse_flag(&raw).ok_or_else(|| {
                Error::ConfigError(format!("ABRIDGE_PRELOAD must be a boolean, got '{raw}'"))
            })?;
        }
        if let Some(raw) = env_non_empty("MAX_CONCURRENT_REQUESTS") {
            config.max_concurrent = raw.parse().map_err(|_| {
                Error::ConfigError(format!(
                    "MAX_CONCURRENT_REQUESTS must be a positive integer, got '{raw}'"
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(Error::ConfigError(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        // <s> and </s> always wrap the input
        if self.max_input_tokens < 3 {
            return Err(Error::ConfigError(format!(
                "max_input_tokens must be at least 3, got {}",
                self.max_input_tokens
            )));
        }
        if let Some(device) = self.device.as_deref() {
            if !matches!(device, "cuda" | "metal" | "mps" | "cpu") {
                return Err(Error::ConfigError(format!("Unknown device '{device}'")));
            }
        }
        Ok(())
    }
}

fn default_models_dir() -> PathBuf {
    if let Some(from_env) = env_non_empty("ABRIDGE_MODELS_DIR") {
        return PathBuf::from(from_env);
    }

    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("abridge")
        .join("models")
}

fn default_dtype() -> String {
    "float32".to_string()
}

fn default_max_input_tokens() -> usize {
    1024
}

fn default_max_concurrent() -> usize {
    4
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_cors_enabled")]
    pub cors_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_enabled: default_cors_enabled(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(host) = env_non_empty("ABRIDGE_HOST") {
            config.host = host;
        }
        if let Some(raw) = env_non_empty("ABRIDGE_PORT") {
            config.port = raw
                .parse()
                .map_err(|_| Error::ConfigError(format!("Invalid ABRIDGE_PORT='{raw}'")))?;
        }
        if let Some(raw) = env_non_empty("ABRIDGE_CORS") {
            config.cors_enabled = parse_flag(&raw).unwrap_or(true);
        }
        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_cors_enabled() -> bool {
    true
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_input_tokens, 1024);
        assert_eq!(config.dtype, "float32");
        assert!(!config.preload);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serde_defaults_fill_missing_fields() {
        let config: EngineConfig = serde_json::from_str(r#"{"preload": true}"#).unwrap();
        assert!(config.preload);
        assert_eq!(config.max_input_tokens, 1024);
        assert_eq!(config.max_concurrent, 4);
    }

    #[test]
    fn test_validate_rejects_unknown_device() {
        let config = EngineConfig {
            device: Some("tpu".to_string()),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = EngineConfig {
            max_concurrent: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn test_server_bind_addr() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:8000");
    }
}
