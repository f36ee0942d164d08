//! Engine configuration
//!
//! Every field has a default, so a JSON config only needs the values it
//! changes. Durations are written the human way (`"750ms"`, `"2m"`).

use std::path::Path;
use std::time::Duration;

use ledgerview_core::{LedgerError, LedgerResult, RetryPolicy};
use ledgerview_fetch::FetchConfig;
use ledgerview_live::{ReconnectPolicy, SubscriberConfig};
use ledgerview_state::MatchConfig;
use serde::{Deserialize, Serialize};

/// Engine configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Log or topic this engine follows; used in log fields only
    pub topic: String,
    /// Maximum confirmed entries kept visible
    pub capacity: usize,
    /// Positions loaded behind the head at startup
    pub lookback: u64,
    /// Positions per fetch request
    pub page_size: u64,
    /// Attempts per fetch page before `FetchFailure`
    pub fetch_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub fetch_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub fetch_backoff_max: Duration,
    /// How long a submission may wait for its confirmation
    #[serde(with = "humantime_serde")]
    pub match_window: Duration,
    /// Allowed lag of the log clock behind the local clock
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,
    #[serde(with = "humantime_serde")]
    pub reconnect_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub reconnect_backoff_max: Duration,
    /// Deliveries held while a gap is open
    pub max_held: usize,
    /// Host command queue depth
    pub command_buffer: usize,
    /// Feed and completion queue depth
    pub input_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            topic: "default".to_string(),
            capacity: 500,
            lookback: 1000,
            page_size: 500,
            fetch_attempts: 4,
            fetch_backoff: Duration::from_millis(200),
            fetch_backoff_max: Duration::from_secs(5),
            match_window: Duration::from_secs(60),
            clock_skew: Duration::from_secs(2),
            reconnect_backoff: Duration::from_millis(500),
            reconnect_backoff_max: Duration::from_secs(30),
            max_held: 1024,
            command_buffer: 64,
            input_buffer: 1024,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON config
    pub fn from_json_str(json: &str) -> LedgerResult<Self> {
        let config: EngineConfig =
            serde_json::from_str(json).map_err(|e| LedgerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file
    pub fn from_json_file(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| LedgerError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> LedgerResult<()> {
        let fail = |msg: &str| Err(LedgerError::Config(msg.to_string()));
        if self.capacity == 0 {
            return fail("capacity must be positive");
        }
        if self.lookback == 0 {
            return fail("lookback must be positive");
        }
        if self.page_size == 0 {
            return fail("page_size must be positive");
        }
        if self.fetch_attempts == 0 {
            return fail("fetch_attempts must be positive");
        }
        if self.match_window.is_zero() {
            return fail("match_window must be positive");
        }
        if self.fetch_backoff > self.fetch_backoff_max {
            return fail("fetch_backoff exceeds fetch_backoff_max");
        }
        if self.reconnect_backoff > self.reconnect_backoff_max {
            return fail("reconnect_backoff exceeds reconnect_backoff_max");
        }
        if self.max_held == 0 || self.command_buffer == 0 || self.input_buffer == 0 {
            return fail("buffer sizes must be positive");
        }
        Ok(())
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_lookback(mut self, lookback: u64) -> Self {
        self.lookback = lookback;
        self
    }

    pub fn with_match_window(mut self, window: Duration) -> Self {
        self.match_window = window;
        self
    }

    pub fn with_fetch_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.fetch_attempts = attempts;
        self.fetch_backoff = backoff;
        self.fetch_backoff_max = self.fetch_backoff_max.max(backoff);
        self
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            page_size: self.page_size,
            retry: RetryPolicy {
                max_attempts: self.fetch_attempts,
                initial_backoff: self.fetch_backoff,
                max_backoff: self.fetch_backoff_max,
            },
        }
    }

    pub fn match_config(&self) -> MatchConfig {
        MatchConfig {
            window: self.match_window,
            clock_skew: self.clock_skew,
        }
    }

    pub fn subscriber_config(&self) -> SubscriberConfig {
        SubscriberConfig {
            lookback: self.lookback,
            max_held: self.max_held,
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_backoff: self.reconnect_backoff,
            max_backoff: self.reconnect_backoff_max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fetch_config().retry.max_attempts, 4);
        assert_eq!(config.subscriber_config().lookback, 1000);
    }

    #[test]
    fn test_json_partial_override() {
        let config = EngineConfig::from_json_str(
            r#"{ "topic": "guestbook", "capacity": 50, "match_window": "90s", "clock_skew": "1500ms" }"#,
        )
        .unwrap();
        assert_eq!(config.topic, "guestbook");
        assert_eq!(config.capacity, 50);
        assert_eq!(config.match_window, Duration::from_secs(90));
        assert_eq!(config.clock_skew, Duration::from_millis(1500));
        assert_eq!(config.lookback, 1000);
    }

    #[test]
    fn test_json_round_trip_uses_human_durations() {
        let json = serde_json::to_value(EngineConfig::default()).unwrap();
        assert_eq!(json["match_window"], "1m");
        assert_eq!(json["fetch_backoff"], "200ms");
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(
            EngineConfig::from_json_str(r#"{ "capacity": 0 }"#),
            Err(LedgerError::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_json_str(r#"{ "match_window": "soon" }"#),
            Err(LedgerError::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_json_str(r#"{ "unknown": 1 }"#),
            Err(LedgerError::Config(_))
        ));
    }

    #[test]
    fn test_builder_helpers() {
        let config = EngineConfig::default()
            .with_topic("t")
            .with_capacity(3)
            .with_match_window(Duration::from_secs(5))
            .with_fetch_retry(2, Duration::from_secs(10));
        assert_eq!(config.capacity, 3);
        assert_eq!(config.fetch_backoff_max, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }
}
