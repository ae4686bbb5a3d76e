// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Destination-agnostic writer configuration.
//!
//! # Configuration
//!
//! A [`WriterConfig`] can be built in code, deserialized from any serde
//! format (durations are expressed in milliseconds), or read from the
//! environment with [`WriterConfig::from_env`]:
//!
//! | Variable                          | Field                        | Default               |
//! |-----------------------------------|------------------------------|-----------------------|
//! | `LOG_SHIPPER_BATCH_DELAY_MS`      | `batch_delay`                | 2000                  |
//! | `LOG_SHIPPER_DISCARD_THRESHOLD`   | `discard_threshold`          | 10000                 |
//! | `LOG_SHIPPER_DISCARD_ACTION`      | `discard_action`             | oldest                |
//! | `LOG_SHIPPER_TRUNCATE_OVERSIZE`   | `truncate_oversize_messages` | true                  |
//! | `LOG_SHIPPER_INIT_TIMEOUT_MS`     | `initialization_timeout`     | 60000                 |
//! | `LOG_SHIPPER_SHUTDOWN_TIMEOUT_MS` | `shutdown_timeout`           | 30000                 |
//! | `LOG_SHIPPER_SYNCHRONOUS`         | `synchronous_mode`           | false                 |
//! | `LOG_SHIPPER_RETRY_STRATEGY`      | `retry_strategy`             | exponential,100,30000 |
//!
//! `batch_delay`, `discard_threshold` and `discard_action` can also be changed
//! on a running writer; see [`LogWriter`](crate::writer::LogWriter).

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::WriterError;
use crate::queue::DiscardAction;

pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(2_000);
pub const DEFAULT_DISCARD_THRESHOLD: usize = 10_000;
pub const DEFAULT_INITIALIZATION_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_RETRY_STRATEGY: RetryStrategy = RetryStrategy::ExponentialBackoff {
    base_ms: 100,
    max_ms: 30_000,
};

/// How long the writer pauses after a batch in which nothing was sent.
///
/// Parsing supports:
/// - `"immediate"` → retry on the next loop iteration
/// - `"linear,500"` → wait 500ms × consecutive failures
/// - `"exponential,100,10000"` → wait 100ms × 2^(failures - 1), capped at 10s
///
/// Defaults to [`DEFAULT_RETRY_STRATEGY`], so a throttling or unreachable
/// destination is not retried in a tight loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryStrategy {
    Immediate,
    LinearBackoff { step_ms: u64 },
    ExponentialBackoff { base_ms: u64, max_ms: u64 },
}

impl RetryStrategy {
    /// Pause before the next attempt after `consecutive_failures` failed
    /// batches in a row.
    #[must_use]
    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }
        match *self {
            RetryStrategy::Immediate => Duration::ZERO,
            RetryStrategy::LinearBackoff { step_ms } => {
                Duration::from_millis(step_ms.saturating_mul(u64::from(consecutive_failures)))
            }
            RetryStrategy::ExponentialBackoff { base_ms, max_ms } => {
                let factor = 1u64
                    .checked_shl(consecutive_failures - 1)
                    .unwrap_or(u64::MAX);
                Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
            }
        }
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        DEFAULT_RETRY_STRATEGY
    }
}

impl FromStr for RetryStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let number = |value: &str| {
            value
                .parse::<u64>()
                .map_err(|e| format!("invalid retry strategy '{s}': {e}"))
        };
        match parts.as_slice() {
            [name] if name.eq_ignore_ascii_case("immediate") => Ok(RetryStrategy::Immediate),
            [name, step] if name.eq_ignore_ascii_case("linear") => {
                Ok(RetryStrategy::LinearBackoff {
                    step_ms: number(step)?,
                })
            }
            [name, base, max] if name.eq_ignore_ascii_case("exponential") => {
                Ok(RetryStrategy::ExponentialBackoff {
                    base_ms: number(base)?,
                    max_ms: number(max)?,
                })
            }
            _ => Err(format!(
                "invalid retry strategy '{s}': expected immediate, linear,<ms> or exponential,<base_ms>,<max_ms>"
            )),
        }
    }
}

impl<'de> Deserialize<'de> for RetryStrategy {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Settings shared by every destination.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// How long the writer keeps accumulating a batch after its first message.
    #[serde(rename = "batch_delay_ms", deserialize_with = "duration_ms::deserialize")]
    pub batch_delay: Duration,
    /// Maximum queue depth before the discard action applies.
    pub discard_threshold: usize,
    pub discard_action: DiscardAction,
    /// Truncate messages too large for the destination instead of dropping
    /// them.
    pub truncate_oversize_messages: bool,
    /// Upper bound on destination initialization.
    #[serde(
        rename = "initialization_timeout_ms",
        deserialize_with = "duration_ms::deserialize"
    )]
    pub initialization_timeout: Duration,
    /// How long a shutdown waits for the writer thread to drain and exit.
    #[serde(
        rename = "shutdown_timeout_ms",
        deserialize_with = "duration_ms::deserialize"
    )]
    pub shutdown_timeout: Duration,
    /// Send on the caller's thread instead of a background thread.
    pub synchronous_mode: bool,
    pub retry_strategy: RetryStrategy,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_delay: DEFAULT_BATCH_DELAY,
            discard_threshold: DEFAULT_DISCARD_THRESHOLD,
            discard_action: DiscardAction::Oldest,
            truncate_oversize_messages: true,
            initialization_timeout: DEFAULT_INITIALIZATION_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            synchronous_mode: false,
            retry_strategy: DEFAULT_RETRY_STRATEGY,
        }
    }
}

impl WriterConfig {
    /// Create configuration from `LOG_SHIPPER_*` environment variables.
    pub fn from_env() -> Result<Self, WriterError> {
        let defaults = Self::default();

        let millis = |key: &str, default: Duration| {
            env::var(key)
                .ok()
                .and_then(|val| val.trim().parse::<u64>().ok())
                .map_or(default, Duration::from_millis)
        };
        let flag = |key: &str, default: bool| {
            env::var(key)
                .map(|val| val.trim().to_lowercase() == "true")
                .unwrap_or(default)
        };

        let discard_action = match env::var("LOG_SHIPPER_DISCARD_ACTION") {
            Ok(val) => val
                .parse()
                .map_err(|e: crate::queue::ParseDiscardActionError| {
                    WriterError::InvalidConfig(e.to_string())
                })?,
            Err(_) => defaults.discard_action,
        };
        let retry_strategy = match env::var("LOG_SHIPPER_RETRY_STRATEGY") {
            Ok(val) => val.parse().map_err(WriterError::InvalidConfig)?,
            Err(_) => defaults.retry_strategy,
        };

        let config = Self {
            batch_delay: millis("LOG_SHIPPER_BATCH_DELAY_MS", defaults.batch_delay),
            discard_threshold: env::var("LOG_SHIPPER_DISCARD_THRESHOLD")
                .ok()
                .and_then(|val| val.trim().parse::<usize>().ok())
                .unwrap_or(defaults.discard_threshold),
            discard_action,
            truncate_oversize_messages: flag(
                "LOG_SHIPPER_TRUNCATE_OVERSIZE",
                defaults.truncate_oversize_messages,
            ),
            initialization_timeout: millis(
                "LOG_SHIPPER_INIT_TIMEOUT_MS",
                defaults.initialization_timeout,
            ),
            shutdown_timeout: millis("LOG_SHIPPER_SHUTDOWN_TIMEOUT_MS", defaults.shutdown_timeout),
            synchronous_mode: flag("LOG_SHIPPER_SYNCHRONOUS", defaults.synchronous_mode),
            retry_strategy,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), WriterError> {
        if self.initialization_timeout.is_zero() {
            return Err(WriterError::InvalidConfig(
                "initialization timeout must be greater than 0".to_string(),
            ));
        }

        if self.shutdown_timeout.is_zero() {
            return Err(WriterError::InvalidConfig(
                "shutdown timeout must be greater than 0".to_string(),
            ));
        }

        if let RetryStrategy::ExponentialBackoff { base_ms, max_ms } = self.retry_strategy {
            if base_ms > max_ms {
                return Err(WriterError::InvalidConfig(format!(
                    "exponential backoff base ({base_ms}ms) exceeds its maximum ({max_ms}ms)"
                )));
            }
        }

        Ok(())
    }

    /// Batch delay actually used by the writer: synchronous mode gains
    /// nothing from batching and always sends immediately.
    #[must_use]
    pub fn effective_batch_delay(&self) -> Duration {
        if self.synchronous_mode {
            Duration::ZERO
        } else {
            self.batch_delay
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = WriterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_delay, DEFAULT_BATCH_DELAY);
        assert_eq!(config.discard_action, DiscardAction::Oldest);
        assert!(config.truncate_oversize_messages);
    }

    #[test]
    fn test_default_retry_strategy_backs_off() {
        let config = WriterConfig::default();
        assert_eq!(config.retry_strategy, RetryStrategy::default());
        assert_eq!(config.retry_strategy.delay(1), Duration::from_millis(100));
        assert_eq!(config.retry_strategy.delay(4), Duration::from_millis(800));
        assert_eq!(config.retry_strategy.delay(30), Duration::from_secs(30));

        let config: WriterConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.retry_strategy, DEFAULT_RETRY_STRATEGY);
    }

    #[test]
    fn test_validate_zero_timeouts() {
        let config = WriterConfig {
            initialization_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = WriterConfig {
            shutdown_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_inverted_backoff() {
        let config = WriterConfig {
            retry_strategy: RetryStrategy::ExponentialBackoff {
                base_ms: 1_000,
                max_ms: 10,
            },
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(WriterError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_synchronous_mode_forces_zero_batch_delay() {
        let config = WriterConfig {
            synchronous_mode: true,
            batch_delay: Duration::from_secs(5),
            ..Default::default()
        };
        assert_eq!(config.effective_batch_delay(), Duration::ZERO);

        let config = WriterConfig {
            batch_delay: Duration::from_secs(5),
            ..Default::default()
        };
        assert_eq!(config.effective_batch_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_deserialize_partial_json() {
        let config: WriterConfig = serde_json::from_str(
            r#"{
                "batch_delay_ms": 250,
                "discard_action": "Newest",
                "discard_threshold": 5,
                "retry_strategy": "linear,100"
            }"#,
        )
        .unwrap();

        assert_eq!(config.batch_delay, Duration::from_millis(250));
        assert_eq!(config.discard_action, DiscardAction::Newest);
        assert_eq!(config.discard_threshold, 5);
        assert_eq!(
            config.retry_strategy,
            RetryStrategy::LinearBackoff { step_ms: 100 }
        );
        assert_eq!(config.shutdown_timeout, DEFAULT_SHUTDOWN_TIMEOUT);
    }

    #[test]
    fn test_deserialize_rejects_bad_discard_action() {
        let result: Result<WriterConfig, _> =
            serde_json::from_str(r#"{"discard_action": "random"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_retry_strategy_parse() {
        assert_eq!(
            "immediate".parse::<RetryStrategy>().unwrap(),
            RetryStrategy::Immediate
        );
        assert_eq!(
            "linear, 250".parse::<RetryStrategy>().unwrap(),
            RetryStrategy::LinearBackoff { step_ms: 250 }
        );
        assert_eq!(
            "Exponential,100,5000".parse::<RetryStrategy>().unwrap(),
            RetryStrategy::ExponentialBackoff {
                base_ms: 100,
                max_ms: 5000
            }
        );
        assert!("linear".parse::<RetryStrategy>().is_err());
        assert!("linear,abc".parse::<RetryStrategy>().is_err());
        assert!("sometimes".parse::<RetryStrategy>().is_err());
    }

    #[test]
    fn test_retry_strategy_delays() {
        assert_eq!(RetryStrategy::Immediate.delay(5), Duration::ZERO);

        let linear = RetryStrategy::LinearBackoff { step_ms: 100 };
        assert_eq!(linear.delay(0), Duration::ZERO);
        assert_eq!(linear.delay(3), Duration::from_millis(300));

        let exponential = RetryStrategy::ExponentialBackoff {
            base_ms: 100,
            max_ms: 1_000,
        };
        assert_eq!(exponential.delay(1), Duration::from_millis(100));
        assert_eq!(exponential.delay(3), Duration::from_millis(400));
        assert_eq!(exponential.delay(10), Duration::from_millis(1_000));
        assert_eq!(exponential.delay(200), Duration::from_millis(1_000));
    }

    #[test]
    fn test_config_from_env() {
        let keys = [
            "LOG_SHIPPER_BATCH_DELAY_MS",
            "LOG_SHIPPER_DISCARD_THRESHOLD",
            "LOG_SHIPPER_DISCARD_ACTION",
            "LOG_SHIPPER_TRUNCATE_OVERSIZE",
            "LOG_SHIPPER_INIT_TIMEOUT_MS",
            "LOG_SHIPPER_SHUTDOWN_TIMEOUT_MS",
            "LOG_SHIPPER_SYNCHRONOUS",
            "LOG_SHIPPER_RETRY_STRATEGY",
        ];
        for key in keys {
            env::remove_var(key);
        }

        // Defaults when nothing is set
        let config = WriterConfig::from_env().unwrap();
        assert_eq!(config, WriterConfig::default());

        env::set_var("LOG_SHIPPER_BATCH_DELAY_MS", "100");
        env::set_var("LOG_SHIPPER_DISCARD_THRESHOLD", "42");
        env::set_var("LOG_SHIPPER_DISCARD_ACTION", "newest");
        env::set_var("LOG_SHIPPER_TRUNCATE_OVERSIZE", "false");
        env::set_var("LOG_SHIPPER_SYNCHRONOUS", "TRUE");
        env::set_var("LOG_SHIPPER_RETRY_STRATEGY", "exponential,10,100");

        let config = WriterConfig::from_env().unwrap();
        assert_eq!(config.batch_delay, Duration::from_millis(100));
        assert_eq!(config.discard_threshold, 42);
        assert_eq!(config.discard_action, DiscardAction::Newest);
        assert!(!config.truncate_oversize_messages);
        assert!(config.synchronous_mode);
        assert_eq!(
            config.retry_strategy,
            RetryStrategy::ExponentialBackoff {
                base_ms: 10,
                max_ms: 100
            }
        );

        env::set_var("LOG_SHIPPER_DISCARD_ACTION", "sometimes");
        assert!(WriterConfig::from_env().is_err());

        for key in keys {
            env::remove_var(key);
        }
    }
}
