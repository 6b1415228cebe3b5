//! Collaborator traits for storage and publishing.
//!
//! The replay engine never touches files or sockets itself. Storage is read
//! through [`StorageReader`] and payloads leave through a [`PublishSink`],
//! so the same scheduling code runs against a bag file, an in-memory list,
//! a UDP socket or an in-process channel.
//!
//! # Design
//!
//! Both traits are synchronous. Storage is a sequential, forward-only cursor
//! and publishing is fire-and-forget, so neither needs an async runtime.
//!
//! # Example
//!
//! ```rust
//! use bagplay_core::io::{MemoryStorage, StorageReader};
//! use bagplay_core::{Message, TopicMetadata};
//!
//! let mut storage = MemoryStorage::new(
//!     vec![TopicMetadata::new("/odom", "nav_msgs/msg/Odometry")],
//!     vec![Message::new("/odom", 0, vec![1]), Message::new("/odom", 10, vec![2])],
//! );
//!
//! let mut count = 0;
//! while storage.has_next() {
//!     let _msg = storage.read_next().unwrap();
//!     count += 1;
//! }
//! assert_eq!(count, 2);
//! ```

use std::collections::VecDeque;

use crate::error::{PublishError, StorageError};
use crate::message::{Message, TopicMetadata};

// =============================================================================
// Storage
// =============================================================================

/// Sequential reader over timestamp-ordered recorded messages.
pub trait StorageReader: Send {
    /// True while another message can be read.
    fn has_next(&self) -> bool;

    /// Read the next message, in storage order.
    fn read_next(&mut self) -> Result<Message, StorageError>;

    /// All topics present in storage, in declaration order.
    fn list_topics(&self) -> Vec<TopicMetadata>;
}

impl<S: StorageReader + ?Sized> StorageReader for Box<S> {
    fn has_next(&self) -> bool {
        (**self).has_next()
    }

    fn read_next(&mut self) -> Result<Message, StorageError> {
        (**self).read_next()
    }

    fn list_topics(&self) -> Vec<TopicMetadata> {
        (**self).list_topics()
    }
}

/// Storage backed by an in-memory list of messages.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    topics: Vec<TopicMetadata>,
    messages: VecDeque<Message>,
}

impl MemoryStorage {
    pub fn new(topics: Vec<TopicMetadata>, messages: Vec<Message>) -> Self {
        Self {
            topics,
            messages: messages.into(),
        }
    }

    /// Build storage for a single topic from `(timestamp, payload)` pairs.
    pub fn single_topic(
        topic: TopicMetadata,
        records: impl IntoIterator<Item = (i64, Vec<u8>)>,
    ) -> Self {
        let messages = records
            .into_iter()
            .map(|(ts, payload)| Message::new(topic.name.clone(), ts, payload))
            .collect();
        Self::new(vec![topic], messages)
    }

    /// Number of messages not yet read.
    pub fn remaining(&self) -> usize {
        self.messages.len()
    }
}

impl StorageReader for MemoryStorage {
    fn has_next(&self) -> bool {
        !self.messages.is_empty()
    }

    fn read_next(&mut self) -> Result<Message, StorageError> {
        self.messages.pop_front().ok_or(StorageError::Exhausted)
    }

    fn list_topics(&self) -> Vec<TopicMetadata> {
        self.topics.clone()
    }
}

// =============================================================================
// Publishing
// =============================================================================

/// Handle that publishes payloads on one topic.
pub trait TopicPublisher: Send + Sync {
    fn publish(&self, payload: &[u8]) -> Result<(), PublishError>;
}

/// Transport that hands out one publisher per topic.
pub trait PublishSink: Send + Sync {
    /// Create the publisher for `topic`. Called once per topic before playback.
    fn create_publisher(
        &self,
        topic: &TopicMetadata,
    ) -> Result<Box<dyn TopicPublisher>, PublishError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage_order_and_exhaustion() {
        let mut storage = MemoryStorage::single_topic(
            TopicMetadata::new("/t", "std_msgs/msg/String"),
            vec![(0, vec![0]), (5, vec![1]), (5, vec![2])],
        );

        assert_eq!(storage.list_topics().len(), 1);
        assert_eq!(storage.remaining(), 3);

        let payloads: Vec<u8> = std::iter::from_fn(|| {
            storage
                .has_next()
                .then(|| storage.read_next().unwrap().payload[0])
        })
        .collect();
        assert_eq!(payloads, vec![0, 1, 2]);

        assert!(!storage.has_next());
        assert!(matches!(storage.read_next(), Err(StorageError::Exhausted)));
    }

    #[test]
    fn test_boxed_reader_delegates() {
        let mut storage: Box<dyn StorageReader> = Box::new(MemoryStorage::new(
            vec![],
            vec![Message::new("/a", 1, vec![])],
        ));
        assert!(storage.has_next());
        assert_eq!(storage.read_next().unwrap().topic, "/a");
        assert!(!storage.has_next());
    }
}
