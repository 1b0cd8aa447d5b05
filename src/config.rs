//! Configuration management for the network-operations agent.
//!
//! Configuration can be set via environment variables:
//! - `OPENAI_API_KEY` - Required. API key for the chat-completions endpoint.
//! - `OPENAI_BASE_URL` - Optional. OpenAI-compatible base URL. Defaults to `https://api.openai.com/v1`.
//! - `DEFAULT_MODEL` - Optional. The model to use. Defaults to `gpt-4o-mini`.
//! - `TEMPERATURE` - Optional. Sampling temperature. Defaults to `0.7`.
//! - `MAX_ITERATIONS` - Optional. Maximum model calls per turn. Defaults to `15`.
//! - `LOOKUP_TIMEOUT_SECS` - Optional. Timeout for DNS/HTTP lookups. Defaults to `5`.
//! - `PROBE_TIMEOUT_SECS` - Optional. Timeout for ping, traceroute and port scans. Defaults to `120`.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_ITERATIONS: usize = 15;

/// Per-call time limits applied by the tool registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolTimeouts {
    /// Remote lookups: DNS, MAC vendor, public IP, web search.
    pub lookup: Duration,

    /// Process-bound probes: ping, traceroute, port scan.
    pub probe: Duration,
}

impl Default for ToolTimeouts {
    fn default() -> Self {
        Self {
            lookup: Duration::from_secs(5),
            probe: Duration::from_secs(120),
        }
    }
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Chat-completions API key
    pub api_key: String,

    /// OpenAI-compatible base URL (without the `/chat/completions` suffix)
    pub base_url: String,

    /// Model identifier
    pub model: String,

    /// Sampling temperature
    pub temperature: f32,

    /// Maximum model calls per user prompt
    pub max_iterations: usize,

    /// Tool timeout policy
    pub tool_timeouts: ToolTimeouts,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `OPENAI_API_KEY` is not set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()))?;

        Self::from_env_with_api_key(api_key)
    }

    /// Load everything except the API key from the environment.
    pub fn from_env_with_api_key(api_key: String) -> Result<Self, ConfigError> {
        Self::from_lookup(api_key, |name| std::env::var(name).ok())
    }

    fn from_lookup(
        api_key: String,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let base_url = lookup("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = validate_base_url(&base_url)?;

        let model = lookup("DEFAULT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let temperature = lookup("TEMPERATURE")
            .map(|v| {
                v.trim()
                    .parse::<f32>()
                    .map_err(|e| invalid("TEMPERATURE", e))
                    .and_then(|t| {
                        if t.is_finite() && t >= 0.0 {
                            Ok(t)
                        } else {
                            Err(invalid("TEMPERATURE", "must be a non-negative number"))
                        }
                    })
            })
            .transpose()?
            .unwrap_or(DEFAULT_TEMPERATURE);

        let max_iterations = lookup("MAX_ITERATIONS")
            .map(|v| parse_positive("MAX_ITERATIONS", &v))
            .transpose()?
            .unwrap_or(DEFAULT_MAX_ITERATIONS as u64) as usize;

        let defaults = ToolTimeouts::default();
        let tool_timeouts = ToolTimeouts {
            lookup: lookup("LOOKUP_TIMEOUT_SECS")
                .map(|v| parse_positive("LOOKUP_TIMEOUT_SECS", &v).map(Duration::from_secs))
                .transpose()?
                .unwrap_or(defaults.lookup),
            probe: lookup("PROBE_TIMEOUT_SECS")
                .map(|v| parse_positive("PROBE_TIMEOUT_SECS", &v).map(Duration::from_secs))
                .transpose()?
                .unwrap_or(defaults.probe),
        };

        Ok(Self {
            api_key,
            base_url,
            model,
            temperature,
            max_iterations,
            tool_timeouts,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model,
            temperature: DEFAULT_TEMPERATURE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tool_timeouts: ToolTimeouts::default(),
        }
    }
}

fn invalid(name: &str, reason: impl std::fmt::Display) -> ConfigError {
    ConfigError::InvalidValue(name.to_string(), reason.to_string())
}

fn parse_positive(name: &str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(0) => Err(invalid(name, "must be greater than zero")),
        Ok(n) => Ok(n),
        Err(e) => Err(invalid(name, e)),
    }
}

fn validate_base_url(value: &str) -> Result<String, ConfigError> {
    let parsed = url::Url::parse(value.trim()).map_err(|e| invalid("OPENAI_BASE_URL", e))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed.as_str().trim_end_matches('/').to_string()),
        other => Err(invalid(
            "OPENAI_BASE_URL",
            format!("unsupported scheme: {}", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup("sk-test".to_string(), |name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = load(&[]).unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.max_iterations, 15);
        assert_eq!(config.tool_timeouts, ToolTimeouts::default());
        assert!((config.temperature - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("OPENAI_BASE_URL", "http://localhost:8080/v1/"),
            ("DEFAULT_MODEL", "gpt-4o"),
            ("TEMPERATURE", "0"),
            ("MAX_ITERATIONS", "3"),
            ("LOOKUP_TIMEOUT_SECS", "2"),
            ("PROBE_TIMEOUT_SECS", "30"),
        ])
        .unwrap();
        assert_eq!(config.base_url, "http://localhost:8080/v1");
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.temperature, 0.0);
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.tool_timeouts.lookup, Duration::from_secs(2));
        assert_eq!(config.tool_timeouts.probe, Duration::from_secs(30));
    }

    #[test]
    fn zero_iterations_rejected() {
        let err = load(&[("MAX_ITERATIONS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref name, _) if name == "MAX_ITERATIONS"));
    }

    #[test]
    fn garbage_timeout_rejected() {
        let err = load(&[("PROBE_TIMEOUT_SECS", "soon")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref name, _) if name == "PROBE_TIMEOUT_SECS"));
    }

    #[test]
    fn negative_temperature_rejected() {
        assert!(load(&[("TEMPERATURE", "-1")]).is_err());
    }

    #[test]
    fn non_http_base_url_rejected() {
        let err = load(&[("OPENAI_BASE_URL", "ftp://example.com")]).unwrap_err();
        assert!(err.to_string().contains("unsupported scheme"));
    }
}
