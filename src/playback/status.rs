//! Read-only progress reporting.
//!
//! The engine writes its phase and playing time into a [`StatusHandle`];
//! anyone holding a clone can take a [`StatusSnapshot`] at any moment
//! without locking or slowing the engine down.

use std::io::{self, Write};
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use bagplay_core::Timestamp;

use super::POLL_INTERVAL;

const UNSET: i64 = i64::MIN;

/// Engine state machine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EnginePhase {
    Warmup = 0,
    Playing = 1,
    Paused = 2,
    Draining = 3,
    Finished = 4,
}

impl EnginePhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => EnginePhase::Warmup,
            1 => EnginePhase::Playing,
            2 => EnginePhase::Paused,
            3 => EnginePhase::Draining,
            _ => EnginePhase::Finished,
        }
    }

    /// Label used on the status line.
    pub fn label(self) -> &'static str {
        match self {
            EnginePhase::Warmup => "WARMUP",
            EnginePhase::Playing => "RUNNING",
            EnginePhase::Paused => "PAUSED",
            EnginePhase::Draining => "DRAINING",
            EnginePhase::Finished => "FINISH",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub phase: EnginePhase,
    /// Timestamp of the last dispatched message
    pub playing_time: Option<Timestamp>,
    /// Recorded time covered so far, from the anchor message
    pub bag_elapsed: Duration,
    /// Wall-clock time since the session started
    pub wallclock_elapsed: Duration,
}

struct Inner {
    phase: AtomicU8,
    playing_time: AtomicI64,
    bag_start_time: AtomicI64,
    started: Instant,
}

#[derive(Clone)]
pub struct StatusHandle {
    inner: Arc<Inner>,
}

impl Default for StatusHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                phase: AtomicU8::new(EnginePhase::Warmup as u8),
                playing_time: AtomicI64::new(UNSET),
                bag_start_time: AtomicI64::new(UNSET),
                started: Instant::now(),
            }),
        }
    }

    pub fn phase(&self) -> EnginePhase {
        EnginePhase::from_u8(self.inner.phase.load(Ordering::Acquire))
    }

    pub(crate) fn set_phase(&self, phase: EnginePhase) {
        self.inner.phase.store(phase as u8, Ordering::Release);
    }

    pub(crate) fn set_playing_time(&self, bag_start_time: Timestamp, playing_time: Timestamp) {
        self.inner
            .bag_start_time
            .store(bag_start_time, Ordering::Relaxed);
        self.inner
            .playing_time
            .store(playing_time, Ordering::Release);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let phase = self.phase();
        let playing_time = self.inner.playing_time.load(Ordering::Acquire);
        let bag_start_time = self.inner.bag_start_time.load(Ordering::Relaxed);

        let (playing_time, bag_elapsed) = if playing_time == UNSET {
            (None, Duration::ZERO)
        } else {
            let elapsed = playing_time.saturating_sub(bag_start_time).max(0);
            (Some(playing_time), Duration::from_nanos(elapsed as u64))
        };

        StatusSnapshot {
            phase,
            playing_time,
            bag_elapsed,
            wallclock_elapsed: self.inner.started.elapsed(),
        }
    }
}

/// Render one status line, without the leading carriage return.
pub fn format_status(snapshot: &StatusSnapshot) -> String {
    let bag_time = snapshot.playing_time.unwrap_or(0) as f64 * 1e-9;
    format!(
        "[{:<7}] Bag Time: {:.3}; Duration: {:.3}",
        snapshot.phase.label(),
        bag_time,
        snapshot.bag_elapsed.as_secs_f64()
    )
}

/// Rewrites a single terminal line with the engine status until it finishes.
pub struct StatusPrinter<W> {
    status: StatusHandle,
    out: W,
}

impl StatusPrinter<io::Stderr> {
    pub fn stderr(status: StatusHandle) -> Self {
        Self::new(status, io::stderr())
    }
}

impl<W: Write> StatusPrinter<W> {
    pub fn new(status: StatusHandle, out: W) -> Self {
        Self { status, out }
    }

    pub async fn run(mut self, token: CancellationToken) -> io::Result<()> {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        writeln!(self.out)?;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = token.cancelled() => break,
            }
            let snapshot = self.status.snapshot();
            if snapshot.phase == EnginePhase::Finished {
                break;
            }
            let mut line = format_status(&snapshot);
            if let Some((terminal_size::Width(width), _)) = terminal_size::terminal_size() {
                line.truncate(usize::from(width).saturating_sub(1));
            }
            write!(self.out, "\r{}", line)?;
            self.out.flush()?;
        }
        write!(self.out, "\r\n[Finish ]\r\n")?;
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_before_first_message() {
        let status = StatusHandle::new();
        let snapshot = status.snapshot();
        assert_eq!(snapshot.phase, EnginePhase::Warmup);
        assert_eq!(snapshot.playing_time, None);
        assert_eq!(snapshot.bag_elapsed, Duration::ZERO);
    }

    #[test]
    fn test_snapshot_tracks_engine() {
        let status = StatusHandle::new();
        status.set_phase(EnginePhase::Paused);
        status.set_playing_time(1_000_000_000, 3_500_000_000);

        let snapshot = status.clone().snapshot();
        assert_eq!(snapshot.phase, EnginePhase::Paused);
        assert_eq!(snapshot.playing_time, Some(3_500_000_000));
        assert_eq!(snapshot.bag_elapsed, Duration::from_millis(2500));
    }

    #[test]
    fn test_format_status() {
        let snapshot = StatusSnapshot {
            phase: EnginePhase::Playing,
            playing_time: Some(12_345_000_000),
            bag_elapsed: Duration::from_millis(1_500),
            wallclock_elapsed: Duration::ZERO,
        };
        assert_eq!(
            format_status(&snapshot),
            "[RUNNING] Bag Time: 12.345; Duration: 1.500"
        );

        let paused = StatusSnapshot {
            phase: EnginePhase::Paused,
            ..snapshot
        };
        assert!(format_status(&paused).starts_with("[PAUSED ] "));
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<std::sync::Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_printer_stops_when_finished() {
        let status = StatusHandle::new();
        status.set_phase(EnginePhase::Playing);
        let out = SharedBuf::default();
        let printer = StatusPrinter::new(status.clone(), out.clone());
        let handle = tokio::spawn(printer.run(CancellationToken::new()));

        tokio::time::sleep(Duration::from_millis(250)).await;
        status.set_phase(EnginePhase::Finished);
        handle.await.unwrap().unwrap();

        let text = String::from_utf8(out.0.lock().unwrap().clone()).unwrap();
        assert!(text.contains("\r[RUNNING] Bag Time: 0.000; Duration: 0.000"));
        assert!(text.ends_with("\r\n[Finish ]\r\n"));
    }

    #[tokio::test]
    async fn test_printer_stops_on_cancel() {
        let out = SharedBuf::default();
        let printer = StatusPrinter::new(StatusHandle::new(), out.clone());
        let token = CancellationToken::new();
        token.cancel();

        printer.run(token).await.unwrap();
        let text = String::from_utf8(out.0.lock().unwrap().clone()).unwrap();
        assert!(text.ends_with("[Finish ]\r\n"));
    }
}
