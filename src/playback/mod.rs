//! Replay engine: prefetch buffer, loader, controller and scheduler.
//!
//! ```text
//!   StorageReader ──► PrefetchLoader ──► ReplayBuffer ──► PlaybackEngine ──► PublishSink
//!                                                              ▲
//!                         ControlInputSource ──► PlaybackController
//! ```

use std::time::Duration;

pub mod buffer;
pub mod controller;
pub mod engine;
pub mod loader;
pub mod session;
pub mod status;

/// Upper bound on every wait in the engine, the status printer and the input thread
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub use buffer::{replay_buffer, BufferConsumer, BufferProducer};
pub use controller::{spawn_control_input, ControlCommand, ControlInputSource, PlaybackController};
pub use engine::{PlaybackEngine, PlaybackOutcome};
pub use loader::PrefetchLoader;
pub use session::{play, prepare_publishers, PlaybackReport};
pub use status::{EnginePhase, StatusHandle, StatusPrinter, StatusSnapshot};
