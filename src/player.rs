//! `bagplay play`: wires a bag file, a sink, the keyboard and the status
//! line around a playback session, and runs it as a shutdown-aware subsystem.

use log::{info, warn};
use std::net::SocketAddr;
use std::thread::JoinHandle;
use thiserror::Error;
use tokio_graceful_shutdown::SubsystemHandle;
use tokio_util::sync::CancellationToken;

use bagplay_core::{PlayOptions, PlaybackState, PublishSink, ReplayError};

use crate::playback::{play, PlaybackController, PlaybackReport, StatusHandle, StatusPrinter};
use crate::recording::{resolve_bag, BagReader};
use crate::sinks::{BroadcastSink, UdpSink};
use crate::PlayArgs;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error(transparent)]
    Replay(#[from] ReplayError),

    #[error("Cannot open UDP sink for {addr}: {source}")]
    Sink {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Keyboard input: {0}")]
    Input(#[source] std::io::Error),
}

/// Subsystem entry point. Requests a process shutdown once playback ends.
pub async fn run(
    subsys: SubsystemHandle,
    args: PlayArgs,
    options: PlayOptions,
) -> Result<(), PlayerError> {
    let token = subsys.create_cancellation_token();
    let result = play_bag(&args, options, token).await;
    subsys.request_shutdown();

    let report = result?;
    info!(
        "Playback {:?}: {} published, {} publish failures, {} starvations, {} skipped",
        report.outcome, report.published, report.publish_failures, report.starvations, report.skipped
    );
    if let Some(e) = &report.loader_error {
        warn!("Playback ended early, bag could not be read completely: {}", e);
    }
    if args.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => warn!("Cannot serialize report: {}", e),
        }
    }
    Ok(())
}

pub async fn play_bag(
    args: &PlayArgs,
    options: PlayOptions,
    token: CancellationToken,
) -> Result<PlaybackReport, PlayerError> {
    let path = resolve_bag(&args.bag);
    let reader = BagReader::open_path(&path).map_err(ReplayError::from)?;
    info!(
        "Opened {}: {} messages on {} topics, {:.3}s",
        path.display(),
        reader.footer().message_count,
        reader.topics().len(),
        reader.footer().duration().as_secs_f64()
    );

    let sink: Box<dyn PublishSink> = match args.udp {
        Some(addr) => Box::new(
            UdpSink::connect(addr).map_err(|source| PlayerError::Sink { addr, source })?,
        ),
        None => {
            info!("No --udp target, messages go to in-process channels only");
            Box::new(BroadcastSink::default())
        }
    };

    let initial = if args.paused {
        PlaybackState::Paused
    } else {
        PlaybackState::Playing
    };
    let controller = PlaybackController::with_state(initial);
    let status = StatusHandle::new();
    let io_token = token.child_token();

    let input = if args.no_keyboard {
        None
    } else {
        start_keyboard(&controller, &io_token)?
    };
    let printer = (!args.no_status)
        .then(|| tokio::spawn(StatusPrinter::stderr(status.clone()).run(io_token.clone())));

    let result = play(reader, sink.as_ref(), options, controller, status, token).await;

    io_token.cancel();
    if let Some(handle) = printer {
        if let Ok(Err(e)) = handle.await {
            warn!("Status line failed: {}", e);
        }
    }
    if let Some(handle) = input {
        join_control_input(handle).await;
    }

    result.map_err(PlayerError::from)
}

/// Wait for the control-input thread; returns false if it panicked.
async fn join_control_input(handle: JoinHandle<()>) -> bool {
    match tokio::task::spawn_blocking(move || handle.join()).await {
        Ok(Ok(())) => true,
        Ok(Err(_)) => {
            warn!("Control input thread panicked");
            false
        }
        Err(e) => {
            warn!("Control input join failed: {}", e);
            false
        }
    }
}

#[cfg(unix)]
fn start_keyboard(
    controller: &PlaybackController,
    token: &CancellationToken,
) -> Result<Option<JoinHandle<()>>, PlayerError> {
    use crate::playback::spawn_control_input;
    use crate::terminal::KeyboardInput;

    let Some(keyboard) = KeyboardInput::new().map_err(PlayerError::Input)? else {
        return Ok(None);
    };
    KeyboardInput::print_help();
    let handle = spawn_control_input(keyboard, controller.clone(), token.clone())
        .map_err(PlayerError::Input)?;
    Ok(Some(handle))
}

#[cfg(not(unix))]
fn start_keyboard(
    _controller: &PlaybackController,
    _token: &CancellationToken,
) -> Result<Option<JoinHandle<()>>, PlayerError> {
    warn!("Keyboard control is not supported on this platform");
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::PlaybackOutcome;
    use crate::recording::BagWriter;
    use bagplay_core::{Message, TopicMetadata};
    use clap::Parser;

    #[tokio::test]
    async fn test_play_bag_headless() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.rbag");
        let mut writer = BagWriter::create(&path).unwrap();
        writer.add_topic(TopicMetadata::new("/t", "t/T")).unwrap();
        for ms in [0i64, 5, 10] {
            writer
                .write_message(&Message::new("/t", ms * 1_000_000, vec![1]))
                .unwrap();
        }
        writer.finish().unwrap();

        let cli = crate::Cli::parse_from([
            "bagplay",
            "play",
            path.to_str().unwrap(),
            "--no-keyboard",
            "--no-status",
        ]);
        let crate::Command::Play(args) = cli.command else {
            panic!("expected play");
        };

        let report = play_bag(&args, PlayOptions::default(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.outcome, PlaybackOutcome::Completed);
        assert_eq!(report.published, 3);
    }

    #[tokio::test]
    async fn test_control_input_panic_is_reported() {
        let clean = std::thread::spawn(|| {});
        assert!(join_control_input(clean).await);

        let crashed = std::thread::spawn(|| panic!("input thread crashed"));
        assert!(!join_control_input(crashed).await);
    }

    #[tokio::test]
    async fn test_missing_bag_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cli = crate::Cli::parse_from([
            "bagplay",
            "play",
            dir.path().join("absent.rbag").to_str().unwrap(),
            "--no-keyboard",
        ]);
        let crate::Command::Play(args) = cli.command else {
            panic!("expected play");
        };

        let err = play_bag(&args, PlayOptions::default(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PlayerError::Replay(ReplayError::Storage(_))));
    }
}
