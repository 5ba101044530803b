//! Call session configuration.
//!
//! Configuration is loaded from environment variables. The relay URL is
//! redacted in Debug output.

use crate::media::MediaConstraints;
use crate::transport::RetryPolicy;

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default ring timeout in seconds.
pub const DEFAULT_RING_TIMEOUT_SECONDS: u64 = 120;

/// Default offer re-transmission period in milliseconds.
pub const DEFAULT_OFFER_RESEND_INTERVAL_MS: u64 = 3000;

/// Default number of publish/subscribe attempts before giving up.
pub const DEFAULT_PUBLISH_MAX_ATTEMPTS: u32 = 3;

/// Default initial retry backoff in milliseconds.
pub const DEFAULT_PUBLISH_BACKOFF_MS: u64 = 250;

/// Default retry backoff ceiling in milliseconds.
pub const DEFAULT_PUBLISH_MAX_BACKOFF_MS: u64 = 2000;

/// Call session configuration.
#[derive(Clone)]
pub struct Config {
    /// How long a call may ring before it fails as not answered (default: 120).
    pub ring_timeout_seconds: u64,

    /// Period for re-sending a pending offer while awaiting an answer (default: 3000).
    pub offer_resend_interval_ms: u64,

    /// Bounded attempts for signal publish/subscribe (default: 3).
    pub publish_max_attempts: u32,

    /// Initial backoff between attempts, doubled each retry (default: 250).
    pub publish_backoff_ms: u64,

    /// Backoff ceiling (default: 2000).
    pub publish_max_backoff_ms: u64,

    /// Request an audio track on start (default: true).
    pub audio_enabled: bool,

    /// Request a video track on start (default: true).
    pub video_enabled: bool,

    /// Redis pub/sub relay URL, if the Redis transport is used.
    /// Protected by `SecretString` since Redis URLs may embed credentials.
    pub redis_url: Option<SecretString>,
}

/// Custom Debug implementation that redacts the relay URL.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("ring_timeout_seconds", &self.ring_timeout_seconds)
            .field("offer_resend_interval_ms", &self.offer_resend_interval_ms)
            .field("publish_max_attempts", &self.publish_max_attempts)
            .field("publish_backoff_ms", &self.publish_backoff_ms)
            .field("publish_max_backoff_ms", &self.publish_max_backoff_ms)
            .field("audio_enabled", &self.audio_enabled)
            .field("video_enabled", &self.video_enabled)
            .field(
                "redis_url",
                &self.redis_url.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ring_timeout_seconds: DEFAULT_RING_TIMEOUT_SECONDS,
            offer_resend_interval_ms: DEFAULT_OFFER_RESEND_INTERVAL_MS,
            publish_max_attempts: DEFAULT_PUBLISH_MAX_ATTEMPTS,
            publish_backoff_ms: DEFAULT_PUBLISH_BACKOFF_MS,
            publish_max_backoff_ms: DEFAULT_PUBLISH_MAX_BACKOFF_MS,
            audio_enabled: true,
            video_enabled: true,
            redis_url: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let ring_timeout_seconds =
            parse_var(vars, "CALL_RING_TIMEOUT_SECONDS", DEFAULT_RING_TIMEOUT_SECONDS)?;
        if ring_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "CALL_RING_TIMEOUT_SECONDS must be greater than zero".to_string(),
            ));
        }

        let offer_resend_interval_ms = parse_var(
            vars,
            "CALL_OFFER_RESEND_INTERVAL_MS",
            DEFAULT_OFFER_RESEND_INTERVAL_MS,
        )?;
        if offer_resend_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "CALL_OFFER_RESEND_INTERVAL_MS must be greater than zero".to_string(),
            ));
        }

        let publish_max_attempts =
            parse_var(vars, "CALL_PUBLISH_MAX_ATTEMPTS", DEFAULT_PUBLISH_MAX_ATTEMPTS)?;
        if publish_max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "CALL_PUBLISH_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        let publish_backoff_ms =
            parse_var(vars, "CALL_PUBLISH_BACKOFF_MS", DEFAULT_PUBLISH_BACKOFF_MS)?;
        let publish_max_backoff_ms = parse_var(
            vars,
            "CALL_PUBLISH_MAX_BACKOFF_MS",
            DEFAULT_PUBLISH_MAX_BACKOFF_MS,
        )?;

        let audio_enabled = parse_var(vars, "CALL_AUDIO_ENABLED", true)?;
        let video_enabled = parse_var(vars, "CALL_VIDEO_ENABLED", true)?;

        let redis_url = vars
            .get("CALL_REDIS_URL")
            .filter(|url| !url.is_empty())
            .map(|url| SecretString::from(url.clone()));

        Ok(Config {
            ring_timeout_seconds,
            offer_resend_interval_ms,
            publish_max_attempts,
            publish_backoff_ms,
            publish_max_backoff_ms,
            audio_enabled,
            video_enabled,
            redis_url,
        })
    }

    /// Ring timer window.
    #[must_use]
    pub fn ring_timeout(&self) -> Duration {
        Duration::from_secs(self.ring_timeout_seconds)
    }

    /// Offer re-transmission period.
    #[must_use]
    pub fn offer_resend_interval(&self) -> Duration {
        Duration::from_millis(self.offer_resend_interval_ms)
    }

    /// Retry policy applied at the transport boundary.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.publish_max_attempts,
            initial_backoff: Duration::from_millis(self.publish_backoff_ms),
            max_backoff: Duration::from_millis(self.publish_max_backoff_ms),
        }
    }

    /// Capture constraints requested on start.
    #[must_use]
    pub fn media_constraints(&self) -> MediaConstraints {
        MediaConstraints {
            audio: self.audio_enabled,
            video: self.video_enabled,
        }
    }
}

/// Parse an optional variable, falling back to `default` when absent.
fn parse_var<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{name}={raw}"))),
        None => Ok(default),
    }
}
