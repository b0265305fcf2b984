//! Pipeline configuration
//!
//! Operational knobs (timeouts, retries, heartbeat, generation settings).
//! The budget split and quality threshold are fixed constants and are not
//! configurable.
//!
//! Every field can be overridden from the environment:
//!
//! | variable                        | field                  |
//! |---------------------------------|------------------------|
//! | `TRIBUNAL_STAGE_TIMEOUT_SECS`   | `stage_timeout_secs`   |
//! | `TRIBUNAL_MAX_RETRIES`          | `max_retries`          |
//! | `TRIBUNAL_RETRY_BACKOFF_MS`     | `retry_backoff_ms`     |
//! | `TRIBUNAL_HEARTBEAT_MS`         | `heartbeat_interval_ms`|
//! | `TRIBUNAL_SUBSCRIBER_CAPACITY`  | `subscriber_capacity`  |
//! | `TRIBUNAL_RETENTION_GRACE_SECS` | `retention_grace_secs` |
//! | `TRIBUNAL_RUN_RETENTION_SECS`   | `run_retention_secs`   |

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::run::StageKind;

/// Generation settings for one stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct StageSettings {
    pub max_output_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Per-attempt deadline for the model call
    pub stage_timeout_secs: u64,
    /// Retries after the first attempt, for transient failures
    pub max_retries: u32,
    /// Base delay, doubled on every retry
    pub retry_backoff_ms: u64,
    /// Re-broadcast interval for the last status event
    pub heartbeat_interval_ms: u64,
    /// Events buffered per subscriber before the oldest are dropped
    pub subscriber_capacity: usize,
    /// How long a finished run's channel stays subscribable
    pub retention_grace_secs: u64,
    /// How long a finished run stays in memory before status reads go to the store
    pub run_retention_secs: u64,
    pub skeptic: StageSettings,
    pub validator: StageSettings,
    pub synthesis: StageSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_timeout_secs: 120,
            max_retries: 2,
            retry_backoff_ms: 500,
            heartbeat_interval_ms: 10_000,
            subscriber_capacity: 64,
            retention_grace_secs: 30,
            run_retention_secs: 600,
            skeptic: StageSettings {
                max_output_tokens: 8_000,
                temperature: 0.7,
            },
            validator: StageSettings {
                max_output_tokens: 8_000,
                temperature: 0.2,
            },
            synthesis: StageSettings {
                max_output_tokens: 4_000,
                temperature: 0.3,
            },
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(variable = name, value = %raw, "ignoring unparseable setting");
                default
            }
        },
        Err(_) => default,
    }
}

impl PipelineConfig {
    /// Defaults overridden by any `TRIBUNAL_*` variables that are set.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            stage_timeout_secs: env_or("TRIBUNAL_STAGE_TIMEOUT_SECS", defaults.stage_timeout_secs),
            max_retries: env_or("TRIBUNAL_MAX_RETRIES", defaults.max_retries),
            retry_backoff_ms: env_or("TRIBUNAL_RETRY_BACKOFF_MS", defaults.retry_backoff_ms),
            heartbeat_interval_ms: env_or("TRIBUNAL_HEARTBEAT_MS", defaults.heartbeat_interval_ms),
            subscriber_capacity: env_or(
                "TRIBUNAL_SUBSCRIBER_CAPACITY",
                defaults.subscriber_capacity,
            ),
            retention_grace_secs: env_or(
                "TRIBUNAL_RETENTION_GRACE_SECS",
                defaults.retention_grace_secs,
            ),
            run_retention_secs: env_or("TRIBUNAL_RUN_RETENTION_SECS", defaults.run_retention_secs),
            ..defaults
        }
    }

    pub fn stage(&self, stage: StageKind) -> StageSettings {
        match stage {
            StageKind::Skeptic => self.skeptic,
            StageKind::Validator => self.validator,
            StageKind::Synthesis => self.synthesis,
        }
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    /// Delay before retry number `retry` (1-based): base, 2x base, 4x base, ...
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    pub fn retention_grace(&self) -> Duration {
        Duration::from_secs(self.retention_grace_secs)
    }

    /// Never shorter than the channel grace period.
    pub fn run_retention(&self) -> Duration {
        Duration::from_secs(self.run_retention_secs.max(self.retention_grace_secs))
    }

    pub fn with_stage_timeout(mut self, secs: u64) -> Self {
        self.stage_timeout_secs = secs;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, backoff_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff_ms = backoff_ms;
        self
    }

    pub fn with_run_retention_secs(mut self, secs: u64) -> Self {
        self.run_retention_secs = secs;
        self
    }

    pub fn with_heartbeat_ms(mut self, interval_ms: u64) -> Self {
        self.heartbeat_interval_ms = interval_ms;
        self
    }
}
