//! Keyboard control for interactive playback.
//!
//! | key            | command     |
//! |----------------|-------------|
//! | space          | pause/resume|
//! | `s`            | step        |
//! | `q`, Ctrl-C    | quit        |

use log::debug;
use nix::poll::{poll, PollFd, PollFlags};
use nix::sys::termios::{self, FlushArg, LocalFlags, SetArg, SpecialCharacterIndices, Termios};
use std::io::{self, IsTerminal, Stdin};
use std::os::fd::{AsFd, AsRawFd};
use std::time::Duration;

use crate::playback::{ControlCommand, ControlInputSource};

/// Map one key byte to a command.
pub fn key_command(byte: u8) -> Option<ControlCommand> {
    match byte {
        b' ' => Some(ControlCommand::TogglePause),
        b's' | b'S' => Some(ControlCommand::Step),
        b'q' | b'Q' | 0x03 => Some(ControlCommand::Quit),
        _ => None,
    }
}

/// Raw-mode stdin reader. The previous terminal settings come back on drop.
pub struct KeyboardInput {
    stdin: Stdin,
    original: Termios,
}

impl KeyboardInput {
    /// Switch stdin to non-canonical, no-echo mode.
    ///
    /// Returns `None` when stdin is not a terminal.
    pub fn new() -> io::Result<Option<Self>> {
        let stdin = io::stdin();
        if !stdin.is_terminal() {
            debug!("stdin is not a terminal, keyboard control disabled");
            return Ok(None);
        }

        let original = termios::tcgetattr(stdin.as_fd())?;
        let mut raw = original.clone();
        raw.local_flags.remove(LocalFlags::ICANON | LocalFlags::ECHO);
        raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        termios::tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &raw)?;

        Ok(Some(Self { stdin, original }))
    }

    pub fn print_help() {
        eprintln!("Press SPACE to pause/resume, 's' to step while paused, 'q' to quit");
    }
}

impl ControlInputSource for KeyboardInput {
    fn poll_command(&mut self, timeout: Duration) -> io::Result<Option<ControlCommand>> {
        let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
        let mut fds = [PollFd::new(self.stdin.as_fd(), PollFlags::POLLIN)];
        let ready = match poll(&mut fds, millis) {
            Ok(n) => n,
            Err(nix::errno::Errno::EINTR) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if ready == 0
            || !fds[0]
                .revents()
                .is_some_and(|r| r.contains(PollFlags::POLLIN))
        {
            return Ok(None);
        }

        let mut byte = [0u8; 1];
        let n = nix::unistd::read(self.stdin.as_raw_fd(), &mut byte)?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdin closed"));
        }
        termios::tcflush(self.stdin.as_fd(), FlushArg::TCIFLUSH)?;
        Ok(key_command(byte[0]))
    }
}

impl Drop for KeyboardInput {
    fn drop(&mut self) {
        if let Err(e) = termios::tcsetattr(self.stdin.as_fd(), SetArg::TCSANOW, &self.original) {
            debug!("Failed to restore terminal: {}", e);
        }
    }
}
