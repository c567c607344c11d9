//! Runtime configuration.
//!
//! Every tunable constant of the runtime lives here so hosts can override
//! them from a JSON blob without touching code.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;

/// Default re-poll cadence while no usable session is present.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default settle window after a pause or resume.
pub const DEFAULT_TRANSITION_DELAY: Duration = Duration::from_millis(400);

/// Default countdown length in seconds.
pub const DEFAULT_TIMER_SECONDS: u32 = 15;

/// Base URL used when the host supplies none.
pub const DEFAULT_API_BASE_URL: &str = "https://api.hexfall.game";

/// Default timeout for the submit-score request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Runtime tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// How often the session manager re-polls while not ready
    #[serde(with = "millis")]
    pub poll_interval: Duration,

    /// How long the Transitioning state lasts
    #[serde(with = "millis")]
    pub transition_delay: Duration,

    /// Countdown length when the session does not specify one
    pub default_timer_seconds: u32,

    /// API base URL when the session does not specify one
    pub default_api_base_url: String,

    /// Whether a game may start without a usable session
    pub allow_unreported_play: bool,

    /// Timeout for the submit-score request
    #[serde(with = "millis")]
    pub request_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            transition_delay: DEFAULT_TRANSITION_DELAY,
            default_timer_seconds: DEFAULT_TIMER_SECONDS,
            default_api_base_url: DEFAULT_API_BASE_URL.to_string(),
            allow_unreported_play: true,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config from JSON; missing keys fall back to defaults.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid("pollInterval must be positive"));
        }
        if self.default_timer_seconds == 0 {
            return Err(ConfigError::Invalid("defaultTimerSeconds must be positive"));
        }
        if self.default_api_base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("defaultApiBaseUrl must not be empty"));
        }
        Ok(())
    }

    /// Transition delay as a chrono duration for timestamp arithmetic.
    pub fn transition_delay_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.transition_delay).unwrap_or(chrono::Duration::zero())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.transition_delay, Duration::from_millis(400));
        assert_eq!(config.default_timer_seconds, 15);
        assert!(config.allow_unreported_play);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = RuntimeConfig::from_json(r#"{"pollInterval": 250, "defaultTimerSeconds": 30}"#)
            .unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.default_timer_seconds, 30);
        assert_eq!(config.default_api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.transition_delay, DEFAULT_TRANSITION_DELAY);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            RuntimeConfig::from_json(r#"{"pollInterval": 0}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RuntimeConfig::from_json("not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
