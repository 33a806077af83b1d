//! Typed configuration for pipelines and their components.
//!
//! Every struct deserializes with defaults for missing fields and must pass
//! `validate()` before use.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_BUFFER_SECONDS: f64 = 2.0;
pub const DEFAULT_EVENT_HISTORY: usize = 256;
pub const DEFAULT_PERIOD_SECONDS: f64 = 0.1;
/// Longest provider period or consumer frame: one day.
pub const MAX_PERIOD_SECONDS: f64 = 86_400.0;

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("must be a positive number of seconds, got {value}"),
        });
    }
    Ok(())
}

fn period(field: &'static str, value: f64) -> Result<(), ConfigError> {
    positive(field, value)?;
    if value > MAX_PERIOD_SECONDS || Duration::try_from_secs_f64(value).is_err() {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("must be at most {MAX_PERIOD_SECONDS} seconds, got {value}"),
        });
    }
    Ok(())
}

/// Tick length for `seconds`, clamped to the valid period range.
fn tick_length(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds.min(MAX_PERIOD_SECONDS))
        .unwrap_or(Duration::from_millis(100))
}

/// Settings shared by the whole pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Seconds of samples each provider's buffer retains.
    pub buffer_seconds: f64,
    /// Events each channel retains for slow listeners.
    pub event_history: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_seconds: DEFAULT_BUFFER_SECONDS,
            event_history: DEFAULT_EVENT_HISTORY,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("buffer_seconds", self.buffer_seconds)?;
        if self.event_history == 0 {
            return Err(ConfigError::Invalid {
                field: "event_history",
                reason: "must retain at least one event".to_string(),
            });
        }
        Ok(())
    }
}

/// Scheduling of one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    /// Seconds between `produce` calls.
    pub period_seconds: f64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            period_seconds: DEFAULT_PERIOD_SECONDS,
        }
    }
}

impl ProviderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        period("period_seconds", self.period_seconds)
    }

    pub fn period(&self) -> Duration {
        tick_length(self.period_seconds)
    }
}

/// Window size and overlap of one consumer. The consumer runs once per frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsumerConfig {
    /// Seconds of new samples per window.
    pub frame_seconds: f64,
    /// Seconds of look-back overlap prepended to each window.
    pub delta_seconds: f64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            frame_seconds: DEFAULT_PERIOD_SECONDS,
            delta_seconds: 0.0,
        }
    }
}

impl ConsumerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        period("frame_seconds", self.frame_seconds)?;
        if !self.delta_seconds.is_finite()
            || self.delta_seconds < 0.0
            || self.delta_seconds > MAX_PERIOD_SECONDS
        {
            return Err(ConfigError::Invalid {
                field: "delta_seconds",
                reason: format!(
                    "must be between 0 and {MAX_PERIOD_SECONDS} seconds, got {}",
                    self.delta_seconds
                ),
            });
        }
        Ok(())
    }

    pub fn period(&self) -> Duration {
        tick_length(self.frame_seconds)
    }
}
