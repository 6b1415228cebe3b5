//! Play/pause/step/quit control plane.
//!
//! [`PlaybackController`] is the only owner of the [`PlaybackState`]. Input
//! collaborators (keyboard, API, tests) call into it from any thread; the
//! engine watches it for changes and consumes step tokens. Nobody but the
//! engine ever touches the replay buffer.

use crossbeam::channel::{Receiver, RecvTimeoutError};
use log::{debug, error, info};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use bagplay_core::PlaybackState;

use super::POLL_INTERVAL;

/// Discrete command from an input device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    TogglePause,
    Step,
    Quit,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ControlState {
    state: PlaybackState,
    pending_steps: u32,
    quit: bool,
}

/// Shared, thread-safe playback state holder.
#[derive(Clone)]
pub struct PlaybackController {
    tx: Arc<watch::Sender<ControlState>>,
}

impl Default for PlaybackController {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PlaybackController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = *self.tx.borrow();
        write!(
            f,
            "PlaybackController {{ state: {}, pending_steps: {}, quit: {} }}",
            s.state, s.pending_steps, s.quit
        )
    }
}

impl PlaybackController {
    pub fn new() -> Self {
        Self::with_state(PlaybackState::Playing)
    }

    /// Create a controller starting in `initial` state.
    pub fn with_state(initial: PlaybackState) -> Self {
        let (tx, _) = watch::channel(ControlState {
            state: initial,
            ..Default::default()
        });
        Self { tx: Arc::new(tx) }
    }

    /// Switch between playing and paused, returning the new state.
    ///
    /// Resuming discards any step tokens that were not consumed yet.
    pub fn toggle_pause(&self) -> PlaybackState {
        let mut new_state = PlaybackState::Playing;
        self.tx.send_modify(|s| {
            s.state = s.state.toggled();
            if s.state == PlaybackState::Playing {
                s.pending_steps = 0;
            }
            new_state = s.state;
        });
        debug!("Playback state switched to {}", new_state);
        new_state
    }

    /// Post one step token. Ignored unless paused; returns whether it was posted.
    pub fn request_step(&self) -> bool {
        self.tx.send_if_modified(|s| {
            if s.state == PlaybackState::Paused && !s.quit {
                s.pending_steps = s.pending_steps.saturating_add(1);
                true
            } else {
                false
            }
        })
    }

    pub fn request_quit(&self) {
        let first = self.tx.send_if_modified(|s| !std::mem::replace(&mut s.quit, true));
        if first {
            info!("Quit requested");
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.tx.borrow().state
    }

    pub fn is_quit_requested(&self) -> bool {
        self.tx.borrow().quit
    }

    pub fn pending_steps(&self) -> u32 {
        self.tx.borrow().pending_steps
    }

    pub fn apply(&self, command: ControlCommand) {
        match command {
            ControlCommand::TogglePause => {
                self.toggle_pause();
            }
            ControlCommand::Step => {
                if !self.request_step() {
                    debug!("Step ignored while playing");
                }
            }
            ControlCommand::Quit => self.request_quit(),
        }
    }

    /// Atomically consume one step token.
    pub(crate) fn take_step(&self) -> bool {
        self.tx.send_if_modified(|s| {
            if s.pending_steps > 0 {
                s.pending_steps -= 1;
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ControlState> {
        self.tx.subscribe()
    }
}

/// Device that produces control commands.
pub trait ControlInputSource: Send {
    /// Wait up to `timeout` for the next command.
    fn poll_command(&mut self, timeout: Duration) -> std::io::Result<Option<ControlCommand>>;
}

/// Commands delivered programmatically over a channel.
impl ControlInputSource for Receiver<ControlCommand> {
    fn poll_command(&mut self, timeout: Duration) -> std::io::Result<Option<ControlCommand>> {
        match self.recv_timeout(timeout) {
            Ok(command) => Ok(Some(command)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "control channel closed",
            )),
        }
    }
}

/// Run `source` on its own thread, forwarding commands to `controller`.
///
/// The thread exits on cancellation, after forwarding `Quit`, or when the
/// source fails. The source is dropped on that thread.
pub fn spawn_control_input<S>(
    mut source: S,
    controller: PlaybackController,
    token: CancellationToken,
) -> std::io::Result<JoinHandle<()>>
where
    S: ControlInputSource + 'static,
{
    thread::Builder::new()
        .name("control-input".to_string())
        .spawn(move || {
            debug!("Control input thread started");
            while !token.is_cancelled() {
                match source.poll_command(POLL_INTERVAL) {
                    Ok(Some(command)) => {
                        debug!("Control command {:?}", command);
                        controller.apply(command);
                        if command == ControlCommand::Quit {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                        debug!("Control input closed");
                        break;
                    }
                    Err(e) => {
                        error!("Control input failed: {}", e);
                        break;
                    }
                }
            }
            debug!("Control input thread finished");
        })
}
