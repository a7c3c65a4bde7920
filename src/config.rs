//! Runtime settings for a chat session.
//!
//! Values come from command line flags, which fall back to environment variables
//! (optionally loaded from a `.env` file by the binary). [`Settings::validate`] is the
//! single place where ranges are enforced.

use crate::error::{Result, VisionChatError};
use crate::llm::gateways::OllamaConfig;
use std::time::Duration;

pub use crate::llm::gateway::DEFAULT_TEMPERATURE;

pub const DEFAULT_HOST: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llava:latest";
pub const MIN_TEMPERATURE: f32 = 0.0;
pub const MAX_TEMPERATURE: f32 = 2.0;

/// Resolved settings for one interactive session
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    /// `None` means "pick the first vision model the daemon reports"
    pub model: Option<String>,
    pub temperature: f32,
    pub chat_timeout: Duration,
    pub keep_loaded: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: std::env::var("OLLAMA_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string()),
            model: None,
            temperature: DEFAULT_TEMPERATURE,
            chat_timeout: Duration::from_secs(120),
            keep_loaded: false,
        }
    }
}

impl Settings {
    /// Check ranges and normalise the host URL
    pub fn validate(mut self) -> Result<Self> {
        check_temperature(self.temperature)?;

        let host = self.host.trim().trim_end_matches('/').to_string();
        if !(host.starts_with("http://") || host.starts_with("https://")) {
            return Err(VisionChatError::ConfigError(format!(
                "Ollama URL must start with http:// or https://, got '{}'",
                self.host
            )));
        }
        self.host = host;

        if self.chat_timeout.is_zero() {
            return Err(VisionChatError::ConfigError(
                "chat timeout must be greater than zero".to_string(),
            ));
        }

        if let Some(model) = &self.model {
            if model.trim().is_empty() {
                self.model = None;
            }
        }

        Ok(self)
    }

    /// Gateway configuration derived from these settings
    pub fn ollama_config(&self) -> OllamaConfig {
        OllamaConfig {
            host: self.host.clone(),
            chat_timeout: self.chat_timeout,
            ..Default::default()
        }
    }
}

/// Reject temperatures outside the range the daemon accepts
pub fn check_temperature(temperature: f32) -> Result<()> {
    if !(MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&temperature) {
        return Err(VisionChatError::ConfigError(format!(
            "temperature must be between {} and {}, got {}",
            MIN_TEMPERATURE, MAX_TEMPERATURE, temperature
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(host: &str) -> Settings {
        Settings {
            host: host.to_string(),
            model: None,
            temperature: DEFAULT_TEMPERATURE,
            chat_timeout: Duration::from_secs(120),
            keep_loaded: false,
        }
    }

    #[test]
    fn test_validate_trims_trailing_slash() {
        let s = settings("http://localhost:11434/").validate().unwrap();
        assert_eq!(s.host, "http://localhost:11434");
    }

    #[test]
    fn test_validate_rejects_missing_scheme() {
        let result = settings("localhost:11434").validate();
        assert!(matches!(result, Err(VisionChatError::ConfigError(_))));
    }

    #[test]
    fn test_validate_rejects_temperature_out_of_range() {
        let mut s = settings(DEFAULT_HOST);
        s.temperature = 2.5;
        assert!(s.validate().is_err());

        let mut s = settings(DEFAULT_HOST);
        s.temperature = -0.1;
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_bounds() {
        assert!(check_temperature(0.0).is_ok());
        assert!(check_temperature(2.0).is_ok());
    }

    #[test]
    fn test_validate_blank_model_becomes_none() {
        let mut s = settings(DEFAULT_HOST);
        s.model = Some("   ".to_string());
        let s = s.validate().unwrap();
        assert!(s.model.is_none());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut s = settings(DEFAULT_HOST);
        s.chat_timeout = Duration::ZERO;
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_ollama_config_carries_host_and_timeout() {
        let mut s = settings("http://gpu-box:11434");
        s.chat_timeout = Duration::from_secs(30);
        let config = s.ollama_config();
        assert_eq!(config.host, "http://gpu-box:11434");
        assert_eq!(config.chat_timeout, Duration::from_secs(30));
    }
}
