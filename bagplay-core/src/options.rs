//! Session options for a replay.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

/// Default number of messages kept ahead of the scheduler
pub const DEFAULT_READ_AHEAD_QUEUE_SIZE: usize = 1000;

/// Fraction of the queue below which the loader refills
pub const READ_AHEAD_LOWER_BOUND: f64 = 0.9;

/// What the engine does when a single publish fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PublishErrorPolicy {
    /// Log the failure and move on to the next message
    #[default]
    LogAndContinue,
    /// End the session with the publish error
    Abort,
}

/// Options fixed for the lifetime of one playback session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayOptions {
    /// Capacity of the prefetch buffer
    pub read_ahead_queue_size: usize,
    /// Offset from the first recorded message at which playback begins
    #[serde(with = "duration_secs", rename = "startOffsetSecs")]
    pub start_time: Duration,
    pub publish_error_policy: PublishErrorPolicy,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            read_ahead_queue_size: DEFAULT_READ_AHEAD_QUEUE_SIZE,
            start_time: Duration::ZERO,
            publish_error_policy: PublishErrorPolicy::default(),
        }
    }
}

impl PlayOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read_ahead_queue_size == 0 {
            return Err(ConfigError::ZeroQueueSize);
        }
        Ok(())
    }

    /// Occupancy below which the loader starts refilling.
    ///
    /// Never zero, otherwise a queue of size 1 would never be refilled.
    pub fn low_watermark(&self) -> usize {
        let bound = (self.read_ahead_queue_size as f64 * READ_AHEAD_LOWER_BOUND) as usize;
        bound.max(1)
    }

    /// Parse a start offset given in (fractional) seconds.
    pub fn start_offset_from_secs(secs: f64) -> Result<Duration, ConfigError> {
        if !secs.is_finite() || secs < 0.0 {
            return Err(ConfigError::InvalidStartOffset(secs));
        }
        Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidStartOffset(secs))
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    use super::PlayOptions;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        PlayOptions::start_offset_from_secs(secs).map_err(serde::de::Error::custom)
    }
}
