use crate::coordinator::{RaceOptions, DEFAULT_BOOKING_ENDPOINT};
use crate::error::ConfigError;
use crate::http_client::HttpClientConfig;
use crate::rate_limiter::{RateLimitConfig, RateLimiter};
use crate::retry::RetryPolicy;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

const ENV_PREFIX: &str = "SLOT_RACER_";

#[derive(Debug, Clone)]
pub struct RacerConfig {
    /// Base URL of the external scheduling service.
    pub api_base_url: String,

    pub api_key: String,

    /// Per-request HTTP timeout.
    ///
    /// Kept well below `race.overall_timeout` so that a hung connection is
    /// retried inside the round instead of eating the whole deadline.
    pub request_timeout: Duration,

    /// Rate limiter resource key that booking calls are charged against.
    pub booking_endpoint: String,

    // =========================
    // Outbound request ceiling
    // =========================
    /// Token bucket for the booking endpoint.
    ///
    /// The external service blocks clients that exceed its ceiling, so the
    /// capacity bounds bursts and the refill rate bounds sustained load.
    pub rate_limit: RateLimitConfig,

    // =========================
    // Retry and race settings
    // =========================
    pub retry: RetryPolicy,

    /// Defaults for concurrency cap and overall round deadline.
    pub race: RaceOptions,

    pub json_logs: bool,
}

impl Default for RacerConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080".to_string(),
            api_key: String::new(),
            request_timeout: Duration::from_secs(10),
            booking_endpoint: DEFAULT_BOOKING_ENDPOINT.to_string(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryPolicy::default(),
            race: RaceOptions::default(),
            json_logs: false,
        }
    }
}

impl RacerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparsable values keep their default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let ms = |key: &str, default: Duration| {
            Duration::from_millis(read(&lookup, key, default.as_millis() as u64))
        };

        Self {
            api_base_url: lookup(&format!("{ENV_PREFIX}API_BASE_URL")).unwrap_or(defaults.api_base_url),
            api_key: lookup(&format!("{ENV_PREFIX}API_KEY")).unwrap_or(defaults.api_key),
            request_timeout: ms("REQUEST_TIMEOUT_MS", defaults.request_timeout),
            booking_endpoint: lookup(&format!("{ENV_PREFIX}BOOKING_ENDPOINT"))
                .unwrap_or(defaults.booking_endpoint),
            rate_limit: RateLimitConfig {
                capacity: read(&lookup, "RATE_CAPACITY", defaults.rate_limit.capacity),
                refill_per_second: read(
                    &lookup,
                    "RATE_REFILL_PER_SEC",
                    defaults.rate_limit.refill_per_second,
                ),
                max_wait: ms("RATE_MAX_WAIT_MS", defaults.rate_limit.max_wait),
            },
            retry: RetryPolicy {
                max_retries: read(&lookup, "MAX_RETRIES", defaults.retry.max_retries),
                base_delay: ms("BASE_DELAY_MS", defaults.retry.base_delay),
                max_delay: ms("MAX_DELAY_MS", defaults.retry.max_delay),
                backoff_factor: read(&lookup, "BACKOFF_FACTOR", defaults.retry.backoff_factor),
                jitter_factor: read(&lookup, "JITTER_FACTOR", defaults.retry.jitter_factor),
                ..defaults.retry
            },
            race: RaceOptions {
                concurrency_cap: read(&lookup, "CONCURRENCY_CAP", defaults.race.concurrency_cap),
                overall_timeout: ms("OVERALL_TIMEOUT_MS", defaults.race.overall_timeout),
            },
            json_logs: read(&lookup, "JSON_LOGS", defaults.json_logs),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit.capacity == 0 {
            return Err(ConfigError::Invalid("rate limit capacity must be positive".into()));
        }
        if !(self.rate_limit.refill_per_second > 0.0) {
            return Err(ConfigError::Invalid("rate limit refill rate must be positive".into()));
        }
        if self.retry.backoff_factor < 1.0 {
            return Err(ConfigError::Invalid("backoff factor must be at least 1.0".into()));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(ConfigError::Invalid("jitter factor must be within [0, 1]".into()));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(ConfigError::Invalid("base delay exceeds max delay".into()));
        }
        if self.race.concurrency_cap == 0 {
            return Err(ConfigError::Invalid("concurrency cap must be at least 1".into()));
        }
        if self.race.overall_timeout.is_zero() {
            return Err(ConfigError::Invalid("overall timeout must be positive".into()));
        }
        Ok(())
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(self.rate_limit.clone())
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            base_url: self.api_base_url.clone(),
            api_key: self.api_key.clone(),
            timeout: self.request_timeout,
        }
    }
}

fn read<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let name = format!("{ENV_PREFIX}{key}");
    match lookup(&name) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(variable = %name, value = %raw, "ignoring unparsable config value");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (format!("{ENV_PREFIX}{k}"), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = RacerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.booking_endpoint, DEFAULT_BOOKING_ENDPOINT);
    }

    #[test]
    fn lookup_overrides_values() {
        let config = RacerConfig::from_lookup(lookup(&[
            ("API_BASE_URL", "https://scheduler.example.com"),
            ("RATE_CAPACITY", "20"),
            ("RATE_REFILL_PER_SEC", "2.5"),
            ("MAX_RETRIES", "5"),
            ("BASE_DELAY_MS", "50"),
            ("CONCURRENCY_CAP", "6"),
            ("OVERALL_TIMEOUT_MS", "1500"),
            ("JSON_LOGS", "true"),
        ]));

        assert_eq!(config.api_base_url, "https://scheduler.example.com");
        assert_eq!(config.rate_limit.capacity, 20);
        assert!((config.rate_limit.refill_per_second - 2.5).abs() < f64::EPSILON);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay, Duration::from_millis(50));
        assert_eq!(config.race.concurrency_cap, 6);
        assert_eq!(config.race.overall_timeout, Duration::from_millis(1500));
        assert!(config.json_logs);
        // Untouched values keep their defaults
        assert_eq!(config.retry.retryable_statuses, RetryPolicy::default().retryable_statuses);
    }

    #[test]
    fn unparsable_values_fall_back_to_defaults() {
        let config = RacerConfig::from_lookup(lookup(&[
            ("RATE_CAPACITY", "lots"),
            ("CONCURRENCY_CAP", "-1"),
        ]));
        assert_eq!(config.rate_limit.capacity, RateLimitConfig::default().capacity);
        assert_eq!(config.race.concurrency_cap, RaceOptions::default().concurrency_cap);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = RacerConfig::default();
        config.retry.jitter_factor = 1.5;
        assert!(config.validate().is_err());

        let mut config = RacerConfig::default();
        config.race.concurrency_cap = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::Invalid("concurrency cap must be at least 1".into()))
        );

        let mut config = RacerConfig::default();
        config.rate_limit.refill_per_second = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn http_settings_flow_into_client_config() {
        let config = RacerConfig::from_lookup(lookup(&[("REQUEST_TIMEOUT_MS", "2500")]));
        let http = config.http_client_config();
        assert_eq!(http.timeout, Duration::from_millis(2500));
        assert_eq!(http.base_url, config.api_base_url);
    }

    #[test]
    fn rate_limiter_starts_full() {
        let config = RacerConfig::from_lookup(lookup(&[("RATE_CAPACITY", "7")]));
        let limiter = config.rate_limiter();
        assert!((limiter.available(&config.booking_endpoint) - 7.0).abs() < 1e-9);
    }
}
