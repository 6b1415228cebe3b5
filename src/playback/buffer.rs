//! Bounded prefetch queue between the loader and the engine.
//!
//! The queue is split into a [`BufferProducer`] and a [`BufferConsumer`].
//! Neither half is `Clone`, so the single-producer/single-consumer contract
//! is enforced by ownership: the loader owns the producer, the engine owns
//! the consumer, and nothing else can push or pop.
//!
//! Dropping the producer marks the stream finished. That flag, not an
//! empty queue, is the only "no more data" signal.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;

use bagplay_core::ReplayableMessage;

/// Returned by [`BufferProducer::enqueue`] when the queue is at capacity.
#[derive(Error, Debug)]
#[error("replay buffer is full")]
pub struct BufferFull(pub ReplayableMessage);

/// Outcome of a non-blocking pop on the consumer side.
#[derive(Debug)]
pub enum Next {
    Item(ReplayableMessage),
    /// Queue empty but the producer is still running
    Starved,
    /// Queue empty and the producer has finished
    Finished,
}

struct Shared {
    queue: ArrayQueue<ReplayableMessage>,
    finished: AtomicBool,
    data_ready: Notify,
    space_freed: Notify,
}

/// Create a queue holding at most `capacity` messages.
pub fn replay_buffer(capacity: usize) -> (BufferProducer, BufferConsumer) {
    let shared = Arc::new(Shared {
        queue: ArrayQueue::new(capacity.max(1)),
        finished: AtomicBool::new(false),
        data_ready: Notify::new(),
        space_freed: Notify::new(),
    });
    (
        BufferProducer {
            shared: shared.clone(),
        },
        BufferConsumer { shared },
    )
}

/// Loader side of the queue.
pub struct BufferProducer {
    shared: Arc<Shared>,
}

impl BufferProducer {
    pub fn enqueue(&self, item: ReplayableMessage) -> Result<(), BufferFull> {
        self.shared.queue.push(item).map_err(BufferFull)?;
        self.shared.data_ready.notify_one();
        Ok(())
    }

    /// Current occupancy. May be stale by the time it is used.
    pub fn approximate_length(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.shared.queue.capacity()
    }

    /// Wait until the consumer has taken at least one item since the last wait.
    pub async fn space_freed(&self) {
        self.shared.space_freed.notified().await
    }

    /// Mark the stream complete. Equivalent to dropping the producer.
    pub fn finish(self) {}
}

impl Drop for BufferProducer {
    fn drop(&mut self) {
        self.shared.finished.store(true, Ordering::Release);
        self.shared.data_ready.notify_one();
    }
}

/// Engine side of the queue.
pub struct BufferConsumer {
    shared: Arc<Shared>,
}

impl BufferConsumer {
    pub fn try_dequeue(&mut self) -> Option<ReplayableMessage> {
        let item = self.shared.queue.pop();
        if item.is_some() {
            self.shared.space_freed.notify_one();
        }
        item
    }

    /// Pop the next item, telling starvation apart from end of stream.
    pub fn next_item(&mut self) -> Next {
        if let Some(item) = self.try_dequeue() {
            return Next::Item(item);
        }
        if !self.is_producer_finished() {
            return Next::Starved;
        }
        // The producer may have pushed between our pop and its finish flag.
        match self.try_dequeue() {
            Some(item) => Next::Item(item),
            None => Next::Finished,
        }
    }

    /// Current occupancy. May be stale by the time it is used.
    pub fn approximate_length(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.shared.queue.capacity()
    }

    pub fn is_producer_finished(&self) -> bool {
        self.shared.finished.load(Ordering::Acquire)
    }

    /// Wait until the producer pushed an item or finished.
    pub async fn data_ready(&self) {
        self.shared.data_ready.notified().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bagplay_core::Message;
    use std::time::Duration;

    fn item(ts: i64) -> ReplayableMessage {
        ReplayableMessage::new(Message::new("/t", ts, vec![]), 0)
    }

    #[test]
    fn test_fifo_order() {
        let (producer, mut consumer) = replay_buffer(4);
        for ts in [10, 20, 20, 30] {
            producer.enqueue(item(ts)).unwrap();
        }
        assert_eq!(consumer.approximate_length(), 4);

        let order: Vec<i64> = std::iter::from_fn(|| consumer.try_dequeue())
            .map(|i| i.message.timestamp)
            .collect();
        assert_eq!(order, vec![10, 20, 20, 30]);
        assert!(consumer.try_dequeue().is_none());
    }

    #[test]
    fn test_enqueue_rejected_at_capacity() {
        let (producer, _consumer) = replay_buffer(2);
        producer.enqueue(item(1)).unwrap();
        producer.enqueue(item(2)).unwrap();

        let rejected = producer.enqueue(item(3)).unwrap_err();
        assert_eq!(rejected.0.message.timestamp, 3);
        assert_eq!(producer.approximate_length(), 2);
    }

    #[test]
    fn test_starved_until_producer_finishes() {
        let (producer, mut consumer) = replay_buffer(2);
        assert!(matches!(consumer.next_item(), Next::Starved));

        producer.enqueue(item(5)).unwrap();
        producer.finish();

        assert!(consumer.is_producer_finished());
        assert!(matches!(consumer.next_item(), Next::Item(i) if i.message.timestamp == 5));
        assert!(matches!(consumer.next_item(), Next::Finished));
    }

    #[test]
    fn test_dropping_producer_marks_finished() {
        let (producer, mut consumer) = replay_buffer(1);
        drop(producer);
        assert!(matches!(consumer.next_item(), Next::Finished));
    }

    #[tokio::test]
    async fn test_notifications() {
        let (producer, mut consumer) = replay_buffer(1);

        producer.enqueue(item(1)).unwrap();
        tokio::time::timeout(Duration::from_secs(1), consumer.data_ready())
            .await
            .expect("push should wake the consumer");

        consumer.try_dequeue().unwrap();
        tokio::time::timeout(Duration::from_secs(1), producer.space_freed())
            .await
            .expect("pop should wake the producer");
    }
}
