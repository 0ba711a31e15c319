//! Client configuration
//!
//! Holds the environment selector, backoff bounds and keep-alive timings for
//! the streaming connection. Every section has defaults, so a configuration
//! file only needs the values it wants to change.

use crate::error::{ConfigurationError, ConfigurationResult};
use crate::serde_utils::duration_millis;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Default minimum delay between retries
pub const DEFAULT_MIN_BACKOFF: Duration = Duration::from_secs(1);
/// Default maximum delay between retries
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(10);
/// Default interval between streaming health checks
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(20);
/// Default time to wait for a health check answer
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(15);

const PRODUCTION_STREAMING_ENDPOINT: &str = "gcm.googleapis.com:5235";
const SANDBOX_STREAMING_ENDPOINT: &str = "gcm-preprod.googleapis.com:5236";
const HTTP_ENDPOINT: &str = "https://gcm-http.googleapis.com/gcm/send";

/// Complete client configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Which server environment to talk to
    pub environment: Environment,
    /// Verbose transport logging
    pub debug: bool,
    /// Retry delays for the unary path
    pub backoff: BackoffConfig,
    /// Health checking of the streaming connection
    pub keep_alive: KeepAliveConfig,
}

/// Server environment selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Sandbox,
}

/// Bounds for exponential backoff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry
    #[serde(rename = "min_delay_ms", with = "duration_millis")]
    pub min_delay: Duration,
    /// Retries stop once the delay grows past this
    #[serde(rename = "max_delay_ms", with = "duration_millis")]
    pub max_delay: Duration,
    /// Randomize delays so concurrent clients do not retry in lockstep
    pub jitter: bool,
}

/// Keep-alive settings for the streaming connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepAliveConfig {
    /// Time between health checks
    #[serde(rename = "ping_interval_ms", with = "duration_millis")]
    pub ping_interval: Duration,
    /// How long a health check may go unanswered
    #[serde(rename = "ping_timeout_ms", with = "duration_millis")]
    pub ping_timeout: Duration,
    /// Pause before retrying a failed connection replacement
    #[serde(rename = "reconnect_delay_ms", with = "duration_millis")]
    pub reconnect_delay: Duration,
}

/// Sender identity and API key
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Project sender id
    pub sender_id: String,
    /// Server API key
    pub api_key: String,
}

impl Environment {
    /// Host and port of the streaming server
    pub fn streaming_endpoint(&self) -> &'static str {
        match self {
            Environment::Production => PRODUCTION_STREAMING_ENDPOINT,
            Environment::Sandbox => SANDBOX_STREAMING_ENDPOINT,
        }
    }

    /// URL of the HTTP send endpoint
    pub fn http_endpoint(&self) -> &'static str {
        HTTP_ENDPOINT
    }

    pub fn is_sandbox(&self) -> bool {
        matches!(self, Environment::Sandbox)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Production => write!(f, "production"),
            Environment::Sandbox => write!(f, "sandbox"),
        }
    }
}

impl Credentials {
    pub fn new(sender_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            sender_id: sender_id.into(),
            api_key: api_key.into(),
        }
    }

    pub fn validate(&self) -> ConfigurationResult<()> {
        if self.sender_id.trim().is_empty() {
            return Err(ConfigurationError::MissingRequired {
                config_key: "sender_id".to_string(),
            });
        }
        if self.api_key.trim().is_empty() {
            return Err(ConfigurationError::MissingRequired {
                config_key: "api_key".to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("sender_id", &self.sender_id)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_delay: DEFAULT_MIN_BACKOFF,
            max_delay: DEFAULT_MAX_BACKOFF,
            jitter: true,
        }
    }
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            reconnect_delay: DEFAULT_PING_INTERVAL,
        }
    }
}

impl ClientConfig {
    /// Load configuration from a `.toml` or `.json` file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> ConfigurationResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|_| ConfigurationError::FileNotFound {
                file_path: path.display().to_string(),
            })?;

        let config: Self = match path.extension().and_then(|s| s.to_str()) {
            Some("json") => {
                serde_json::from_str(&content).map_err(|e| ConfigurationError::ParseError {
                    parse_error: e.to_string(),
                })?
            }
            Some("toml") => toml::from_str(&content).map_err(|e| ConfigurationError::ParseError {
                parse_error: e.to_string(),
            })?,
            _ => {
                return Err(ConfigurationError::InvalidParameter {
                    parameter: "file_extension".to_string(),
                    reason: "Unsupported file format. Use json or toml".to_string(),
                });
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> ConfigurationResult<()> {
        let mut errors = Vec::new();

        if self.backoff.min_delay.is_zero() {
            errors.push("backoff.min_delay must be greater than 0".to_string());
        }
        if self.backoff.min_delay > self.backoff.max_delay {
            errors.push("backoff.min_delay must not exceed backoff.max_delay".to_string());
        }
        if self.keep_alive.ping_interval.is_zero() {
            errors.push("keep_alive.ping_interval must be greater than 0".to_string());
        }
        if self.keep_alive.ping_timeout.is_zero() {
            errors.push("keep_alive.ping_timeout must be greater than 0".to_string());
        }
        if self.keep_alive.reconnect_delay.is_zero() {
            errors.push("keep_alive.reconnect_delay must be greater than 0".to_string());
        }

        if !errors.is_empty() {
            return Err(ConfigurationError::ValidationFailed {
                validation_errors: errors,
            });
        }

        Ok(())
    }
}
