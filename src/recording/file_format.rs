//! RBAG (recorded bag) file format implementation.
//!
//! Little-endian binary layout:
//!
//! ```text
//! +----------------------+  0
//! | header (64 bytes)    |
//! +----------------------+  messages_offset
//! | record               |  timestamp_ns i64 | topic_index u16 | len u32 | payload
//! | record ...           |
//! +----------------------+  topics_offset
//! | topics (JSON array)  |
//! +----------------------+  EOF - 32
//! | footer (32 bytes)    |
//! +----------------------+
//! ```
//!
//! Topics are written after the records so that a writer can register new
//! topics while recording; the header is rewritten with the final offsets
//! when the file is finished.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bagplay_core::{Message, StorageError, StorageReader, Timestamp, TopicMetadata};

/// Magic bytes for RBAG file header
pub const RBAG_MAGIC: [u8; 4] = *b"RBG1";

/// Magic bytes for RBAG file footer
pub const RBAG_FOOTER_MAGIC: [u8; 4] = *b"RBGF";

/// Current format version
pub const RBAG_VERSION: u16 = 1;

/// Header size in bytes (fixed)
pub const HEADER_SIZE: usize = 64;

/// Footer size in bytes (fixed)
pub const FOOTER_SIZE: usize = 32;

/// Fixed part of a record, before the payload
pub const RECORD_HEADER_SIZE: usize = 8 + 2 + 4;

/// Largest payload a reader accepts
pub const MAX_PAYLOAD_SIZE: usize = 256 * 1024 * 1024;

/// File extension used by [`crate::recording::manager`]
pub const RBAG_EXTENSION: &str = "rbag";

fn le_u16(buf: &[u8], at: usize) -> u16 {
    let mut b = [0u8; 2];
    b.copy_from_slice(&buf[at..at + 2]);
    u16::from_le_bytes(b)
}

fn le_u32(buf: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(b)
}

fn le_u64(buf: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(b)
}

fn le_i64(buf: &[u8], at: usize) -> i64 {
    le_u64(buf, at) as i64
}

fn invalid(msg: impl Into<String>) -> StorageError {
    StorageError::InvalidFormat(msg.into())
}

/// Read the JSON topic table, checking its extent against the file first.
pub(crate) fn read_topic_table<R: Read + Seek>(
    reader: &mut R,
    header: &RbagHeader,
) -> Result<Vec<u8>, StorageError> {
    let file_len = reader.seek(SeekFrom::End(0))?;
    let limit = file_len.saturating_sub(FOOTER_SIZE as u64);
    match header.topics_offset.checked_add(header.topics_len as u64) {
        Some(end) if header.topics_offset >= HEADER_SIZE as u64 && end <= limit => {}
        _ => {
            return Err(invalid(format!(
                "topic table at {}+{} outside file of {} bytes",
                header.topics_offset, header.topics_len, file_len
            )))
        }
    }

    reader.seek(SeekFrom::Start(header.topics_offset))?;
    let mut json = vec![0u8; header.topics_len as usize];
    reader.read_exact(&mut json)?;
    Ok(json)
}

/// File header (64 bytes fixed size)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RbagHeader {
    pub version: u16,
    /// Reserved flags
    pub flags: u16,
    /// Wall-clock creation time, nanoseconds since the Unix epoch
    pub start_time_ns: i64,
    pub topics_offset: u64,
    pub topics_len: u32,
    pub messages_offset: u64,
}

impl Default for RbagHeader {
    fn default() -> Self {
        Self {
            version: RBAG_VERSION,
            flags: 0,
            start_time_ns: 0,
            topics_offset: 0,
            topics_len: 0,
            messages_offset: HEADER_SIZE as u64,
        }
    }
}

impl RbagHeader {
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let mut buf = [0u8; HEADER_SIZE];

        buf[0..4].copy_from_slice(&RBAG_MAGIC);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6..8].copy_from_slice(&self.flags.to_le_bytes());
        buf[8..16].copy_from_slice(&self.start_time_ns.to_le_bytes());
        buf[16..24].copy_from_slice(&self.topics_offset.to_le_bytes());
        buf[24..28].copy_from_slice(&self.topics_len.to_le_bytes());
        buf[28..36].copy_from_slice(&self.messages_offset.to_le_bytes());
        // Remaining 28 bytes are reserved (already zeroed)

        writer.write_all(&buf)
    }

    pub fn read<R: Read>(reader: &mut R) -> Result<Self, StorageError> {
        let mut buf = [0u8; HEADER_SIZE];
        reader.read_exact(&mut buf)?;

        if buf[0..4] != RBAG_MAGIC {
            return Err(invalid("bad header magic"));
        }
        let version = le_u16(&buf, 4);
        if version > RBAG_VERSION {
            return Err(invalid(format!("unsupported version {}", version)));
        }

        Ok(Self {
            version,
            flags: le_u16(&buf, 6),
            start_time_ns: le_i64(&buf, 8),
            topics_offset: le_u64(&buf, 16),
            topics_len: le_u32(&buf, 24),
            messages_offset: le_u64(&buf, 28),
        })
    }
}

/// File footer (32 bytes fixed size)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RbagFooter {
    pub message_count: u64,
    /// Timestamp of the first record, zero when empty
    pub first_timestamp: Timestamp,
    /// Timestamp of the last record, zero when empty
    pub last_timestamp: Timestamp,
}

impl RbagFooter {
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let mut buf = [0u8; FOOTER_SIZE];

        buf[0..4].copy_from_slice(&RBAG_FOOTER_MAGIC);
        // 4..8 reserved
        buf[8..16].copy_from_slice(&self.message_count.to_le_bytes());
        buf[16..24].copy_from_slice(&self.first_timestamp.to_le_bytes());
        buf[24..32].copy_from_slice(&self.last_timestamp.to_le_bytes());

        writer.write_all(&buf)
    }

    /// Read footer from reader (assumes reader is positioned at footer start)
    pub fn read<R: Read>(reader: &mut R) -> Result<Self, StorageError> {
        let mut buf = [0u8; FOOTER_SIZE];
        reader.read_exact(&mut buf)?;

        if buf[0..4] != RBAG_FOOTER_MAGIC {
            return Err(invalid("bad footer magic, file not finished?"));
        }

        Ok(Self {
            message_count: le_u64(&buf, 8),
            first_timestamp: le_i64(&buf, 16),
            last_timestamp: le_i64(&buf, 24),
        })
    }

    /// Recorded time span between first and last record.
    pub fn duration(&self) -> Duration {
        let span = self.last_timestamp.saturating_sub(self.first_timestamp).max(0);
        Duration::from_nanos(span as u64)
    }
}

/// Writer for creating RBAG files
pub struct BagWriter<W: Write + Seek> {
    writer: W,
    header: RbagHeader,
    topics: Vec<TopicMetadata>,
    footer: RbagFooter,
}

impl BagWriter<BufWriter<File>> {
    /// Create (or truncate) a bag file at `path`.
    pub fn create(path: &Path) -> Result<Self, StorageError> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file))
    }
}

impl<W: Write + Seek> BagWriter<W> {
    pub fn new(mut writer: W) -> Result<Self, StorageError> {
        let start_time_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);

        // Placeholder, rewritten by finish()
        let header = RbagHeader {
            start_time_ns,
            ..Default::default()
        };
        header.write(&mut writer)?;

        Ok(Self {
            writer,
            header,
            topics: Vec::new(),
            footer: RbagFooter::default(),
        })
    }

    /// Register a topic, returning its index. Registering the same name again
    /// returns the existing index.
    pub fn add_topic(&mut self, topic: TopicMetadata) -> Result<u16, StorageError> {
        if let Some(index) = self.topic_index(&topic.name) {
            return Ok(index);
        }
        let index = u16::try_from(self.topics.len())
            .map_err(|_| invalid("too many topics"))?;
        self.topics.push(topic);
        Ok(index)
    }

    fn topic_index(&self, name: &str) -> Option<u16> {
        self.topics
            .iter()
            .position(|t| t.name == name)
            .and_then(|i| u16::try_from(i).ok())
    }

    pub fn write_message(&mut self, message: &Message) -> Result<(), StorageError> {
        let topic_index = self
            .topic_index(&message.topic)
            .ok_or_else(|| invalid(format!("topic {} was not added", message.topic)))?;
        if message.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(invalid(format!(
                "payload of {} bytes exceeds the limit",
                message.payload.len()
            )));
        }

        let mut record = [0u8; RECORD_HEADER_SIZE];
        record[0..8].copy_from_slice(&message.timestamp.to_le_bytes());
        record[8..10].copy_from_slice(&topic_index.to_le_bytes());
        record[10..14].copy_from_slice(&(message.payload.len() as u32).to_le_bytes());
        self.writer.write_all(&record)?;
        self.writer.write_all(&message.payload)?;

        if self.footer.message_count == 0 {
            self.footer.first_timestamp = message.timestamp;
        }
        self.footer.last_timestamp = message.timestamp;
        self.footer.message_count += 1;
        Ok(())
    }

    pub fn message_count(&self) -> u64 {
        self.footer.message_count
    }

    /// Write topics and footer, fix up the header and return the inner writer.
    pub fn finish(mut self) -> Result<W, StorageError> {
        let topics_json =
            serde_json::to_vec(&self.topics).map_err(|e| invalid(e.to_string()))?;
        self.header.topics_offset = self.writer.stream_position()?;
        self.header.topics_len = u32::try_from(topics_json.len())
            .map_err(|_| invalid("topic table too large"))?;
        self.writer.write_all(&topics_json)?;

        self.footer.write(&mut self.writer)?;

        self.writer.seek(SeekFrom::Start(0))?;
        self.header.write(&mut self.writer)?;
        self.writer.seek(SeekFrom::End(0))?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Reader for RBAG files, usable directly as a playback [`StorageReader`].
pub struct BagReader<R: Read + Seek> {
    reader: R,
    header: RbagHeader,
    footer: RbagFooter,
    topics: Vec<TopicMetadata>,
    read_count: u64,
}

impl BagReader<BufReader<File>> {
    pub fn open_path(path: &Path) -> Result<Self, StorageError> {
        let file = File::open(path)?;
        Self::open(BufReader::new(file))
    }
}

impl<R: Read + Seek> BagReader<R> {
    pub fn open(mut reader: R) -> Result<Self, StorageError> {
        let header = RbagHeader::read(&mut reader)?;

        reader.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let footer = RbagFooter::read(&mut reader)?;

        let topics_json = read_topic_table(&mut reader, &header)?;
        let topics: Vec<TopicMetadata> = serde_json::from_slice(&topics_json)
            .map_err(|e| invalid(format!("topic table: {}", e)))?;

        reader.seek(SeekFrom::Start(header.messages_offset))?;

        Ok(Self {
            reader,
            header,
            footer,
            topics,
            read_count: 0,
        })
    }

    pub fn header(&self) -> &RbagHeader {
        &self.header
    }

    pub fn footer(&self) -> &RbagFooter {
        &self.footer
    }

    pub fn topics(&self) -> &[TopicMetadata] {
        &self.topics
    }

    /// Reset to the first record
    pub fn rewind(&mut self) -> Result<(), StorageError> {
        self.reader
            .seek(SeekFrom::Start(self.header.messages_offset))?;
        self.read_count = 0;
        Ok(())
    }
}

impl<R: Read + Seek + Send> StorageReader for BagReader<R> {
    fn has_next(&self) -> bool {
        self.read_count < self.footer.message_count
    }

    fn read_next(&mut self) -> Result<Message, StorageError> {
        if !self.has_next() {
            return Err(StorageError::Exhausted);
        }

        let mut record = [0u8; RECORD_HEADER_SIZE];
        self.reader.read_exact(&mut record)?;
        let timestamp = le_i64(&record, 0);
        let topic_index = le_u16(&record, 8) as usize;
        let len = le_u32(&record, 10) as usize;

        let topic = self
            .topics
            .get(topic_index)
            .ok_or_else(|| invalid(format!("unknown topic index {}", topic_index)))?;
        if len > MAX_PAYLOAD_SIZE {
            return Err(invalid(format!("record payload of {} bytes", len)));
        }

        let mut payload = vec![0u8; len];
        self.reader.read_exact(&mut payload)?;
        self.read_count += 1;

        Ok(Message::new(topic.name.clone(), timestamp, payload))
    }

    fn list_topics(&self) -> Vec<TopicMetadata> {
        self.topics.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_bag() -> Vec<u8> {
        let mut writer = BagWriter::new(Cursor::new(Vec::new())).unwrap();
        writer
            .add_topic(TopicMetadata::new("/scan", "sensor_msgs/msg/LaserScan"))
            .unwrap();
        writer
            .add_topic(TopicMetadata::new("/odom", "nav_msgs/msg/Odometry"))
            .unwrap();
        for (topic, ts, payload) in [
            ("/scan", 1_000, vec![1, 2, 3]),
            ("/odom", 1_500, vec![]),
            ("/scan", 2_000, vec![4]),
        ] {
            writer
                .write_message(&Message::new(topic, ts, payload))
                .unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_header_layout() {
        let header = RbagHeader {
            start_time_ns: 1_234_567_890_123,
            topics_offset: 4096,
            topics_len: 77,
            ..Default::default()
        };

        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);
        assert_eq!(&buf[0..4], b"RBG1");

        let read_header = RbagHeader::read(&mut Cursor::new(buf)).unwrap();
        assert_eq!(read_header, header);
    }

    #[test]
    fn test_reader_yields_records_in_order() {
        let mut reader = BagReader::open(Cursor::new(sample_bag())).unwrap();

        assert_eq!(reader.footer().message_count, 3);
        assert_eq!(reader.footer().duration(), Duration::from_nanos(1_000));
        assert_eq!(reader.topics()[1].type_name, "nav_msgs/msg/Odometry");

        let mut messages = Vec::new();
        while reader.has_next() {
            messages.push(reader.read_next().unwrap());
        }
        assert_eq!(
            messages,
            vec![
                Message::new("/scan", 1_000, vec![1, 2, 3]),
                Message::new("/odom", 1_500, vec![]),
                Message::new("/scan", 2_000, vec![4]),
            ]
        );
        assert!(matches!(reader.read_next(), Err(StorageError::Exhausted)));

        reader.rewind().unwrap();
        assert_eq!(reader.read_next().unwrap().timestamp, 1_000);
    }

    #[test]
    fn test_duplicate_topic_keeps_index() {
        let mut writer = BagWriter::new(Cursor::new(Vec::new())).unwrap();
        let a = writer.add_topic(TopicMetadata::new("/a", "t/A")).unwrap();
        let b = writer.add_topic(TopicMetadata::new("/b", "t/B")).unwrap();
        assert_eq!(writer.add_topic(TopicMetadata::new("/a", "t/A")).unwrap(), a);
        assert_ne!(a, b);
    }

    #[test]
    fn test_write_unregistered_topic_fails() {
        let mut writer = BagWriter::new(Cursor::new(Vec::new())).unwrap();
        let err = writer
            .write_message(&Message::new("/nope", 0, vec![]))
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidFormat(_)));
        assert_eq!(writer.message_count(), 0);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = sample_bag();
        bytes[0] = b'X';
        assert!(matches!(
            BagReader::open(Cursor::new(bytes)),
            Err(StorageError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_oversized_topic_table_rejected() {
        let mut bytes = sample_bag();
        bytes[24..28].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            BagReader::open(Cursor::new(bytes)),
            Err(StorageError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_topic_offset_past_end_rejected() {
        let mut bytes = sample_bag();
        bytes[16..24].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(
            BagReader::open(Cursor::new(bytes)),
            Err(StorageError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_unfinished_file_rejected() {
        let writer = BagWriter::new(Cursor::new(Vec::new())).unwrap();
        // Dropped without finish(): header only, no footer
        let bytes = writer.writer.into_inner();
        assert!(BagReader::open(Cursor::new(bytes)).is_err());
    }

    #[test]
    fn test_corrupt_topic_index() {
        let mut bytes = sample_bag();
        // First record's topic index
        bytes[HEADER_SIZE + 8] = 9;
        let mut reader = BagReader::open(Cursor::new(bytes)).unwrap();
        assert!(matches!(
            reader.read_next(),
            Err(StorageError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drive.rbag");

        let mut writer = BagWriter::create(&path).unwrap();
        writer.add_topic(TopicMetadata::new("/t", "t/T")).unwrap();
        writer
            .write_message(&Message::new("/t", 42, vec![7; 16]))
            .unwrap();
        writer.finish().unwrap();

        let mut reader = BagReader::open_path(&path).unwrap();
        assert_eq!(reader.list_topics().len(), 1);
        assert_eq!(reader.read_next().unwrap().payload, vec![7; 16]);
        assert!(!reader.has_next());
    }
}
