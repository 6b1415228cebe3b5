//! Error types for replay sessions

use thiserror::Error;

/// Invalid play options, detected before any task is started
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The read-ahead queue must hold at least one message
    #[error("read_ahead_queue_size must be greater than zero")]
    ZeroQueueSize,

    /// Start offset given in seconds was negative, not a number, or out of range
    #[error("Invalid start offset: {0} seconds")]
    InvalidStartOffset(f64),
}

/// Errors raised by a storage reader
#[derive(Error, Debug)]
pub enum StorageError {
    /// Underlying file or stream failed
    #[error("I/O operation failed: {0}")]
    Io(#[from] std::io::Error),

    /// Data does not follow the expected layout
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// `read_next` was called after the last message
    #[error("No more messages in storage")]
    Exhausted,
}

/// Errors raised while creating a publisher or publishing a payload
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PublishError {
    /// Message refers to a topic that was never announced by storage
    #[error("No publisher for topic '{0}'")]
    UnknownTopic(String),

    /// The sink rejected the topic or its type
    #[error("Cannot create publisher for '{topic}' ({type_name}): {reason}")]
    Setup {
        topic: String,
        type_name: String,
        reason: String,
    },

    /// The transport failed to deliver the payload
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Umbrella error for a replay session
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Publish to '{topic}' failed: {source}")]
    Publish {
        topic: String,
        #[source]
        source: PublishError,
    },

    #[error("Cannot prepare publishers: {0}")]
    PublisherSetup(PublishError),

    /// Loader pushed past the queue capacity
    #[error("Replay buffer overrun at capacity {0}")]
    BufferOverrun(usize),
}
