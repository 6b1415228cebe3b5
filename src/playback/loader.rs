//! Background reader that keeps the replay buffer topped up.

use log::{debug, error, info};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use bagplay_core::{PlayOptions, ReplayError, ReplayableMessage, StorageReader, Timestamp};

use super::buffer::BufferProducer;

/// Idle interval of the fill phase when the buffer is above the low watermark
pub const LOADER_IDLE_INTERVAL: Duration = Duration::from_millis(1);

/// What the loader did before it finished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoaderSummary {
    /// Messages dropped by the start-offset skip
    pub skipped: u64,
    /// Messages pushed into the buffer
    pub enqueued: u64,
    /// Timestamp of the first retained message
    pub bag_start_time: Option<Timestamp>,
}

/// Reads storage sequentially and feeds the buffer under a low-watermark policy.
///
/// The loader owns the only [`BufferProducer`]. When `run` returns, for any
/// reason, the producer is dropped and the consumer sees the stream as finished.
pub struct PrefetchLoader<S> {
    reader: S,
    producer: BufferProducer,
    options: PlayOptions,
    token: CancellationToken,
    summary: LoaderSummary,
}

impl<S: StorageReader> PrefetchLoader<S> {
    pub fn new(
        reader: S,
        producer: BufferProducer,
        options: PlayOptions,
        token: CancellationToken,
    ) -> Self {
        Self {
            reader,
            producer,
            options,
            token,
            summary: LoaderSummary::default(),
        }
    }

    pub async fn run(mut self) -> Result<LoaderSummary, ReplayError> {
        let result = self.load().await;
        match &result {
            Ok(()) => info!(
                "Loader finished: {} enqueued, {} skipped",
                self.summary.enqueued, self.summary.skipped
            ),
            Err(e) => error!("Loader stopped after {} messages: {}", self.summary.enqueued, e),
        }
        result.map(|()| self.summary)
    }

    async fn load(&mut self) -> Result<(), ReplayError> {
        let Some(bag_start_time) = self.skip_to_start()? else {
            debug!("Storage exhausted before the start offset");
            return Ok(());
        };

        let capacity = self.options.read_ahead_queue_size;
        let low_watermark = self.options.low_watermark();

        while self.reader.has_next() && !self.token.is_cancelled() {
            if self.producer.approximate_length() < low_watermark {
                while self.producer.approximate_length() < capacity
                    && self.reader.has_next()
                    && !self.token.is_cancelled()
                {
                    let message = self.reader.read_next()?;
                    self.enqueue(ReplayableMessage::new(message, bag_start_time))?;
                }
            } else {
                tokio::select! {
                    _ = self.producer.space_freed() => {}
                    _ = tokio::time::sleep(LOADER_IDLE_INTERVAL) => {}
                    _ = self.token.cancelled() => break,
                }
            }
        }
        Ok(())
    }

    /// Drop everything before `first_timestamp + start_time` and enqueue the
    /// anchor message. Returns the anchor timestamp, or `None` when storage
    /// ran out first.
    fn skip_to_start(&mut self) -> Result<Option<Timestamp>, ReplayError> {
        if !self.reader.has_next() {
            return Ok(None);
        }
        let mut message = self.reader.read_next()?;
        let offset = self.options.start_time.as_nanos().min(i64::MAX as u128) as i64;
        let threshold = message.timestamp.saturating_add(offset);

        while message.timestamp < threshold {
            self.summary.skipped += 1;
            if !self.reader.has_next() || self.token.is_cancelled() {
                return Ok(None);
            }
            message = self.reader.read_next()?;
        }

        let bag_start_time = message.timestamp;
        if self.summary.skipped > 0 {
            debug!(
                "Skipped {} messages, playback starts at {}",
                self.summary.skipped, bag_start_time
            );
        }
        self.summary.bag_start_time = Some(bag_start_time);
        self.enqueue(ReplayableMessage::new(message, bag_start_time))?;
        Ok(Some(bag_start_time))
    }

    fn enqueue(&mut self, item: ReplayableMessage) -> Result<(), ReplayError> {
        self.producer
            .enqueue(item)
            .map_err(|_| ReplayError::BufferOverrun(self.producer.capacity()))?;
        self.summary.enqueued += 1;
        Ok(())
    }
}
