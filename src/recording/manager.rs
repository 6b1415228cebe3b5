//! Bag file discovery and metadata.

use log::debug;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bagplay_core::StorageError;

use crate::config;

use super::file_format::{read_topic_table, RbagFooter, RbagHeader, FOOTER_SIZE, RBAG_EXTENSION};

/// Default directory searched by `bagplay list`
pub fn bags_dir() -> PathBuf {
    config::data_dir().join("bags")
}

/// Summary of one bag file, read from its header and footer only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BagInfo {
    /// Filename (without path)
    pub filename: String,
    #[serde(skip)]
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    pub message_count: u64,
    /// Recorded span from first to last message, in milliseconds
    pub duration_ms: u64,
    pub topic_count: usize,
    /// Source-clock timestamp of the first message
    pub first_timestamp: i64,
    /// File modification time (Unix timestamp ms)
    pub modified_ms: u64,
}

pub fn get_bag_info(path: &Path) -> Result<BagInfo, StorageError> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    let metadata = fs::metadata(path)?;
    let modified_ms = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    let mut reader = BufReader::new(File::open(path)?);
    let header = RbagHeader::read(&mut reader)?;
    reader.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
    let footer = RbagFooter::read(&mut reader)?;

    // Topic table is only parsed for its length
    let json = read_topic_table(&mut reader, &header)?;
    let topics: Vec<serde_json::Value> = serde_json::from_slice(&json)
        .map_err(|e| StorageError::InvalidFormat(format!("topic table: {}", e)))?;

    Ok(BagInfo {
        filename,
        path: path.to_path_buf(),
        size: metadata.len(),
        message_count: footer.message_count,
        duration_ms: footer.duration().as_millis() as u64,
        topic_count: topics.len(),
        first_timestamp: footer.first_timestamp,
        modified_ms,
    })
}

/// All readable `.rbag` files in `dir`, newest first.
///
/// Unreadable or malformed files are skipped.
pub fn list_bags(dir: &Path) -> Vec<BagInfo> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut bags: Vec<BagInfo> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|e| e == RBAG_EXTENSION))
        .filter_map(|path| match get_bag_info(&path) {
            Ok(info) => Some(info),
            Err(e) => {
                debug!("Skipping {}: {}", path.display(), e);
                None
            }
        })
        .collect();

    bags.sort_by(|a, b| {
        b.modified_ms
            .cmp(&a.modified_ms)
            .then_with(|| a.filename.cmp(&b.filename))
    });
    bags
}

/// Resolve a bag argument: an existing path, or a file name inside [`bags_dir`].
pub fn resolve_bag(name: &Path) -> PathBuf {
    if name.exists() || name.components().count() > 1 {
        return name.to_path_buf();
    }
    let candidate = bags_dir().join(name);
    if candidate.exists() {
        candidate
    } else {
        name.to_path_buf()
    }
}
