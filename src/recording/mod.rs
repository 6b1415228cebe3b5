//! Bag files on disk.
//!
//! `.rbag` is a small binary container for recorded messages:
//!
//! ```text
//! ┌──────────────────────────┐
//! │ Header (64 bytes)        │  magic "RBG1", version, offsets
//! ├──────────────────────────┤
//! │ Record 0                 │  timestamp + topic index + payload
//! │ Record 1                 │
//! │ ...                      │
//! ├──────────────────────────┤
//! │ Topics (JSON)            │  [{"name": ..., "type": ...}]
//! ├──────────────────────────┤
//! │ Footer (32 bytes)        │  message count, first/last timestamp
//! └──────────────────────────┘
//! ```

pub mod file_format;
pub mod manager;

pub use file_format::{BagReader, BagWriter, RbagFooter, RbagHeader};
pub use manager::{bags_dir, get_bag_info, list_bags, resolve_bag, BagInfo};
