//! The scheduling loop.
//!
//! The engine is the only consumer of the replay buffer. It waits for the
//! buffer to warm up, then dispatches each message at
//! `anchor + time_since_start`, reacting to the controller for pause, step
//! and quit.
//!
//! ```text
//!   Warmup ──► Playing ◄──────► Paused
//!                │  ▲              │
//!        starved │  │ data         │ quit / cancel
//!                ▼  │              ▼
//!             Draining ───────► Finished
//! ```

use log::{debug, error, info, trace, warn};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use bagplay_core::{
    PlaybackState, PublishError, PublishErrorPolicy, ReplayError, ReplayableMessage, Timestamp,
    TopicPublisher,
};

use super::buffer::{BufferConsumer, Next};
use super::controller::{ControlState, PlaybackController};
use super::status::{EnginePhase, StatusHandle};
use super::POLL_INTERVAL;

/// Topic name to publisher, built once before playback.
pub type PublisherTable = HashMap<String, Box<dyn TopicPublisher>>;

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Every retained message was dispatched
    Completed,
    /// The controller received a quit command
    Quit,
    /// The shutdown token fired
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSummary {
    pub outcome: PlaybackOutcome,
    pub published: u64,
    pub publish_failures: u64,
    pub starvations: u64,
    pub playing_time: Option<Timestamp>,
}

/// Wall-clock instant paired with the recorded offset it corresponds to.
///
/// Equivalent to `wall_clock_anchor = instant - offset`, without having to
/// subtract a possibly large offset from a monotonic instant.
#[derive(Debug, Clone, Copy)]
struct Anchor {
    instant: Instant,
    offset: Duration,
}

impl Anchor {
    fn deadline(&self, time_since_start: Duration) -> Instant {
        self.instant + time_since_start.saturating_sub(self.offset)
    }
}

enum Step {
    Continue,
    Done(PlaybackOutcome),
}

pub struct PlaybackEngine {
    consumer: BufferConsumer,
    publishers: PublisherTable,
    controller: PlaybackController,
    status: StatusHandle,
    policy: PublishErrorPolicy,
    token: CancellationToken,

    anchor: Anchor,
    /// Item popped while the controller switched to paused
    held: Option<ReplayableMessage>,
    /// Set on entering pause; the next dispatched item re-anchors the clock
    resync_on_next: bool,
    starving: bool,

    published: u64,
    publish_failures: u64,
    starvations: u64,
    playing_time: Option<Timestamp>,
}

impl PlaybackEngine {
    pub fn new(
        consumer: BufferConsumer,
        publishers: PublisherTable,
        controller: PlaybackController,
        status: StatusHandle,
        policy: PublishErrorPolicy,
        token: CancellationToken,
    ) -> Self {
        Self {
            consumer,
            publishers,
            controller,
            status,
            policy,
            token,
            anchor: Anchor {
                instant: Instant::now(),
                offset: Duration::ZERO,
            },
            held: None,
            resync_on_next: false,
            starving: false,
            published: 0,
            publish_failures: 0,
            starvations: 0,
            playing_time: None,
        }
    }

    pub async fn run(mut self) -> Result<EngineSummary, ReplayError> {
        let mut changes = self.controller.subscribe();

        let result = match self.warmup().await {
            Some(outcome) => Ok(outcome),
            None => self.dispatch_loop(&mut changes).await,
        };
        self.status.set_phase(EnginePhase::Finished);

        let outcome = result?;
        info!(
            "Playback {:?}: {} published, {} failed, {} starvations",
            outcome, self.published, self.publish_failures, self.starvations
        );
        Ok(EngineSummary {
            outcome,
            published: self.published,
            publish_failures: self.publish_failures,
            starvations: self.starvations,
            playing_time: self.playing_time,
        })
    }

    /// Wait until the buffer is full or the loader is done, then anchor the clock.
    async fn warmup(&mut self) -> Option<PlaybackOutcome> {
        self.status.set_phase(EnginePhase::Warmup);
        let capacity = self.consumer.capacity();
        loop {
            if let Some(outcome) = self.stop_requested() {
                return Some(outcome);
            }
            if self.consumer.is_producer_finished()
                || self.consumer.approximate_length() >= capacity
            {
                break;
            }
            tokio::select! {
                _ = self.consumer.data_ready() => {}
                _ = sleep(POLL_INTERVAL) => {}
                _ = self.token.cancelled() => {}
            }
        }
        debug!(
            "Warmup done with {} buffered messages",
            self.consumer.approximate_length()
        );
        self.anchor = Anchor {
            instant: Instant::now(),
            offset: Duration::ZERO,
        };
        None
    }

    async fn dispatch_loop(
        &mut self,
        changes: &mut watch::Receiver<ControlState>,
    ) -> Result<PlaybackOutcome, ReplayError> {
        loop {
            if let Some(outcome) = self.stop_requested() {
                return Ok(outcome);
            }
            let step = match self.controller.state() {
                PlaybackState::Playing => self.play_next(changes).await?,
                PlaybackState::Paused => self.paused(changes).await?,
            };
            if let Step::Done(outcome) = step {
                return Ok(outcome);
            }
        }
    }

    fn stop_requested(&self) -> Option<PlaybackOutcome> {
        if self.token.is_cancelled() {
            Some(PlaybackOutcome::Cancelled)
        } else if self.controller.is_quit_requested() {
            Some(PlaybackOutcome::Quit)
        } else {
            None
        }
    }

    /// Take the held item or pop the next one, and dispatch it on schedule.
    async fn play_next(
        &mut self,
        changes: &mut watch::Receiver<ControlState>,
    ) -> Result<Step, ReplayError> {
        let item = match self.held.take() {
            Some(item) => item,
            None => match self.consumer.next_item() {
                Next::Item(item) => {
                    self.end_starvation();
                    item
                }
                Next::Finished => return Ok(Step::Done(PlaybackOutcome::Completed)),
                Next::Starved => {
                    self.begin_starvation();
                    tokio::select! {
                        _ = self.consumer.data_ready() => {}
                        _ = sleep(POLL_INTERVAL) => {}
                        _ = changes.changed() => {}
                        _ = self.token.cancelled() => {}
                    }
                    return Ok(Step::Continue);
                }
            },
        };

        self.status.set_phase(EnginePhase::Playing);
        if self.resync_on_next {
            self.anchor = Anchor {
                instant: Instant::now(),
                offset: item.time_since_start,
            };
            self.resync_on_next = false;
            debug!("Clock re-anchored at offset {:?}", item.time_since_start);
        }

        let deadline = self.anchor.deadline(item.time_since_start);
        loop {
            if self.stop_requested().is_some() || self.controller.state() == PlaybackState::Paused
            {
                self.held = Some(item);
                return Ok(Step::Continue);
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::select! {
                _ = sleep_until(deadline.min(now + POLL_INTERVAL)) => {}
                _ = changes.changed() => {}
                _ = self.token.cancelled() => {}
            }
        }

        self.publish(item)?;
        Ok(Step::Continue)
    }

    /// Serve step tokens until the controller resumes or stops playback.
    async fn paused(
        &mut self,
        changes: &mut watch::Receiver<ControlState>,
    ) -> Result<Step, ReplayError> {
        if !self.resync_on_next {
            debug!("Playback paused");
            self.resync_on_next = true;
        }
        self.status.set_phase(EnginePhase::Paused);

        if self.controller.take_step() {
            let item = match self.held.take() {
                Some(item) => Some(item),
                None => match self.consumer.next_item() {
                    Next::Item(item) => Some(item),
                    Next::Starved | Next::Finished => None,
                },
            };
            match item {
                Some(item) => self.publish(item)?,
                None => debug!("Step ignored, buffer is empty"),
            }
            return Ok(Step::Continue);
        }

        tokio::select! {
            _ = changes.changed() => {}
            _ = sleep(POLL_INTERVAL) => {}
            _ = self.token.cancelled() => {}
        }
        Ok(Step::Continue)
    }

    fn begin_starvation(&mut self) {
        self.status.set_phase(EnginePhase::Draining);
        if !self.starving {
            self.starving = true;
            self.starvations += 1;
            warn!("Message queue starved. Messages will be delayed.");
        }
    }

    fn end_starvation(&mut self) {
        if self.starving {
            self.starving = false;
            debug!("Message queue refilled");
        }
    }

    fn publish(&mut self, item: ReplayableMessage) -> Result<(), ReplayError> {
        let bag_start_time = item.bag_start_time();
        let message = item.message;

        let result = match self.publishers.get(&message.topic) {
            Some(publisher) => publisher.publish(&message.payload),
            None => Err(PublishError::UnknownTopic(message.topic.clone())),
        };

        self.playing_time = Some(message.timestamp);
        self.status
            .set_playing_time(bag_start_time, message.timestamp);

        match result {
            Ok(()) => {
                self.published += 1;
                trace!(
                    "Published {} bytes on {} at {}",
                    message.payload.len(),
                    message.topic,
                    message.timestamp
                );
                Ok(())
            }
            Err(e) => {
                self.publish_failures += 1;
                match self.policy {
                    PublishErrorPolicy::LogAndContinue => {
                        warn!("Failed to publish on {}: {}", message.topic, e);
                        Ok(())
                    }
                    PublishErrorPolicy::Abort => {
                        error!("Failed to publish on {}: {}", message.topic, e);
                        Err(ReplayError::Publish {
                            topic: message.topic,
                            source: e,
                        })
                    }
                }
            }
        }
    }
}
