//! # bagplay
//!
//! Time-faithful replay of recorded message bags with interactive
//! pause, resume and single-step control.
//!
//! ## Architecture
//!
//! The player is built on top of [`bagplay_core`] for the message model and
//! collaborator traits, with [`tokio`] providing the async runtime.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          bagplay                             │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐  │
//! │  │ BagReader    │──►│ Prefetch     │──►│ ReplayBuffer     │  │
//! │  │ (.rbag)      │   │ Loader task  │   │ (SPSC, bounded)  │  │
//! │  └──────────────┘   └──────────────┘   └────────┬─────────┘  │
//! │                                                 ▼            │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐  │
//! │  │ Keyboard     │──►│ Playback     │──►│ PlaybackEngine   │──┼──► UdpSink /
//! │  │ (termios)    │   │ Controller   │   │ (scheduler)      │  │    BroadcastSink
//! │  └──────────────┘   └──────────────┘   └────────┬─────────┘  │
//! │                                                 ▼            │
//! │                                        ┌──────────────────┐  │
//! │                                        │ StatusPrinter    │  │
//! │                                        └──────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example: Replaying In-Process
//!
//! ```rust,no_run
//! use bagplay::playback::{play, PlaybackController, StatusHandle};
//! use bagplay::recording::BagReader;
//! use bagplay::sinks::BroadcastSink;
//! use bagplay_core::PlayOptions;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let reader = BagReader::open_path("drive.rbag".as_ref()).unwrap();
//!     let sink = BroadcastSink::default();
//!     let mut scans = sink.subscribe("/scan");
//!     tokio::spawn(async move {
//!         while let Ok(payload) = scans.recv().await {
//!             println!("scan of {} bytes", payload.len());
//!         }
//!     });
//!
//!     let report = play(
//!         reader,
//!         &sink,
//!         PlayOptions::default(),
//!         PlaybackController::new(),
//!         StatusHandle::new(),
//!         CancellationToken::new(),
//!     )
//!     .await
//!     .unwrap();
//!     println!("{} messages published", report.published);
//! }
//! ```
//!
//! ## Command-Line Interface
//!
//! See [`Cli`] for all available options:
//!
//! - `bagplay play <BAG>` - replay a bag, SPACE pauses, `s` steps, `q` quits
//! - `bagplay info <BAG>` - header, topics and duration of a bag
//! - `bagplay list [DIR]` - bags in a directory, newest first
//! - `-v` / `-q` - more or less logging

use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

use bagplay_core::{ConfigError, PlayOptions, PublishErrorPolicy};

pub mod config;
pub mod playback;
pub mod player;
pub mod recording;
pub mod sinks;
#[cfg(unix)]
pub mod terminal;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Clone, Debug)]
#[command(version, about = "Replay recorded message bags in real time")]
pub struct Cli {
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    /// Configuration file with default play options
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Replay a bag file
    Play(PlayArgs),
    /// Show header, topics and duration of a bag file
    Info {
        bag: PathBuf,
    },
    /// List bag files, newest first
    List {
        /// Directory to search, defaults to the per-user bags directory
        dir: Option<PathBuf>,
    },
}

#[derive(Args, Clone, Debug)]
pub struct PlayArgs {
    /// Bag file, or the name of a file in the bags directory
    pub bag: PathBuf,

    /// Number of messages buffered ahead of playback
    #[arg(long, value_name = "N")]
    pub read_ahead_queue_size: Option<usize>,

    /// Start this many seconds after the first message
    #[arg(long, value_name = "SECS")]
    pub start_offset: Option<f64>,

    /// Send every message as a UDP datagram to this address
    #[arg(long, value_name = "HOST:PORT")]
    pub udp: Option<SocketAddr>,

    /// Start paused, waiting for SPACE or `s`
    #[arg(long, default_value_t = false)]
    pub paused: bool,

    /// Do not read keys from the terminal
    #[arg(long, default_value_t = false)]
    pub no_keyboard: bool,

    /// Do not print the status line
    #[arg(long, default_value_t = false)]
    pub no_status: bool,

    /// Stop at the first message that cannot be published
    #[arg(long, default_value_t = false)]
    pub abort_on_publish_error: bool,

    /// Print the playback report as JSON on stdout
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

impl PlayArgs {
    /// Override file-provided options with the flags that were given.
    pub fn apply_to(&self, options: &mut PlayOptions) -> Result<(), ConfigError> {
        if let Some(size) = self.read_ahead_queue_size {
            options.read_ahead_queue_size = size;
        }
        if let Some(secs) = self.start_offset {
            options.start_time = PlayOptions::start_offset_from_secs(secs)?;
        }
        if self.abort_on_publish_error {
            options.publish_error_policy = PublishErrorPolicy::Abort;
        }
        options.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn play_args(args: &[&str]) -> PlayArgs {
        let argv = ["bagplay", "play"].iter().chain(args.iter()).copied();
        match Cli::parse_from(argv).command {
            Command::Play(args) => args,
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_flags_override_file_options() {
        let args = play_args(&[
            "drive.rbag",
            "--read-ahead-queue-size",
            "20",
            "--start-offset",
            "1.25",
            "--abort-on-publish-error",
        ]);
        let mut options = PlayOptions {
            read_ahead_queue_size: 500,
            ..Default::default()
        };
        args.apply_to(&mut options).unwrap();

        assert_eq!(options.read_ahead_queue_size, 20);
        assert_eq!(options.start_time, Duration::from_millis(1250));
        assert_eq!(options.publish_error_policy, PublishErrorPolicy::Abort);
    }

    #[test]
    fn test_absent_flags_keep_file_options() {
        let args = play_args(&["drive.rbag"]);
        let mut options = PlayOptions {
            read_ahead_queue_size: 500,
            ..Default::default()
        };
        args.apply_to(&mut options).unwrap();
        assert_eq!(options.read_ahead_queue_size, 500);
        assert!(!args.paused);
        assert!(args.udp.is_none());
    }

    #[test]
    fn test_zero_queue_rejected() {
        let args = play_args(&["drive.rbag", "--read-ahead-queue-size", "0"]);
        let mut options = PlayOptions::default();
        assert_eq!(args.apply_to(&mut options), Err(ConfigError::ZeroQueueSize));
    }

    #[test]
    fn test_udp_target_parsed() {
        let args = play_args(&["drive.rbag", "--udp", "127.0.0.1:9000", "--paused"]);
        assert_eq!(args.udp, Some("127.0.0.1:9000".parse().unwrap()));
        assert!(args.paused);
    }

    #[test]
    fn test_list_without_dir() {
        let cli = Cli::parse_from(["bagplay", "-v", "list"]);
        assert!(matches!(cli.command, Command::List { dir: None }));
    }
}
