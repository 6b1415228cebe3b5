//! # Bagplay Core
//!
//! Platform-independent message model for time-faithful bag replay.
//!
//! This crate holds the data types and collaborator traits shared by the
//! player runtime, with **no async runtime and no I/O dependencies**.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  bagplay-core (no tokio, no sockets)                        │
//! │  ├── message/  (Message, ReplayableMessage, TopicMetadata)  │
//! │  ├── options/  (PlayOptions, PublishErrorPolicy)            │
//! │  ├── io/       (StorageReader, PublishSink, MemoryStorage)  │
//! │  └── error/    (ConfigError, StorageError, PublishError)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              ▲
//!                 ┌────────────┴────────────┐
//!                 │  bagplay                │
//!                 │  (buffer, loader,       │
//!                 │   engine, sinks, CLI)   │
//!                 └─────────────────────────┘
//! ```
//!
//! ## Example: Preparing a Session
//!
//! ```rust
//! use bagplay_core::{MemoryStorage, PlayOptions, StorageReader, TopicMetadata};
//! use std::time::Duration;
//!
//! let storage = MemoryStorage::single_topic(
//!     TopicMetadata::new("/scan", "sensor_msgs/msg/LaserScan"),
//!     vec![(0, vec![0xAA]), (100_000_000, vec![0xBB])],
//! );
//! assert_eq!(storage.list_topics()[0].name, "/scan");
//!
//! let options = PlayOptions {
//!     start_time: Duration::from_millis(50),
//!     ..Default::default()
//! };
//! assert!(options.validate().is_ok());
//! ```

pub mod error;
pub mod io;
pub mod message;
pub mod options;

// Re-export commonly used types
pub use error::{ConfigError, PublishError, ReplayError, StorageError};
pub use io::{MemoryStorage, PublishSink, StorageReader, TopicPublisher};
pub use message::{Message, PlaybackState, ReplayableMessage, Timestamp, TopicMetadata};
pub use options::{PlayOptions, PublishErrorPolicy, DEFAULT_READ_AHEAD_QUEUE_SIZE};
