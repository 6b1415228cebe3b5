//! Recorded messages and their replay scheduling offsets.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Nanoseconds on the recording's source clock.
pub type Timestamp = i64;

/// A single recorded message, immutable once read from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Topic the message was recorded on
    pub topic: String,
    /// Absolute source-clock timestamp in nanoseconds
    pub timestamp: Timestamp,
    /// Serialized payload, opaque to the player
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(topic: impl Into<String>, timestamp: Timestamp, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            timestamp,
            payload,
        }
    }
}

/// A message paired with its offset from the playback anchor.
///
/// The offset is computed once, when the loader enqueues the message, and
/// is never recomputed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayableMessage {
    pub message: Message,
    pub time_since_start: Duration,
}

impl ReplayableMessage {
    /// Pair `message` with its offset from `bag_start_time`.
    ///
    /// Timestamps earlier than the anchor (out-of-order storage) are
    /// clamped to a zero offset.
    pub fn new(message: Message, bag_start_time: Timestamp) -> Self {
        let offset = message.timestamp.saturating_sub(bag_start_time).max(0);
        Self {
            message,
            time_since_start: Duration::from_nanos(offset as u64),
        }
    }

    /// The anchor's recorded timestamp, recovered from this message.
    pub fn bag_start_time(&self) -> Timestamp {
        self.message
            .timestamp
            .saturating_sub(self.time_since_start.as_nanos() as i64)
    }
}

/// Topic name and type as announced by storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicMetadata {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

impl TopicMetadata {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// User-facing play/pause state, owned by the playback controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Playing,
    Paused,
}

impl PlaybackState {
    pub fn toggled(self) -> Self {
        match self {
            PlaybackState::Playing => PlaybackState::Paused,
            PlaybackState::Paused => PlaybackState::Playing,
        }
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_from_anchor() {
        let msg = Message::new("/imu", 1_500_000_000, vec![1, 2, 3]);
        let item = ReplayableMessage::new(msg, 1_000_000_000);

        assert_eq!(item.time_since_start, Duration::from_millis(500));
        assert_eq!(item.bag_start_time(), 1_000_000_000);
    }

    #[test]
    fn test_out_of_order_timestamp_clamps_to_zero() {
        let msg = Message::new("/imu", 900, vec![]);
        let item = ReplayableMessage::new(msg, 1_000);

        assert_eq!(item.time_since_start, Duration::ZERO);
    }

    #[test]
    fn test_topic_metadata_json_shape() {
        let topic = TopicMetadata::new("/scan", "sensor_msgs/msg/LaserScan");
        let json = serde_json::to_string(&topic).unwrap();
        assert_eq!(json, r#"{"name":"/scan","type":"sensor_msgs/msg/LaserScan"}"#);

        let back: TopicMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, topic);
    }

    #[test]
    fn test_state_toggle() {
        assert_eq!(PlaybackState::Playing.toggled(), PlaybackState::Paused);
        assert_eq!(PlaybackState::Paused.toggled(), PlaybackState::Playing);
        assert_eq!(PlaybackState::default(), PlaybackState::Playing);
    }
}
