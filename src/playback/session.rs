//! One complete playback run, from validation to report.

use log::{debug, info, warn};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use bagplay_core::{
    PlayOptions, PublishSink, ReplayError, StorageReader, Timestamp, TopicMetadata,
};

use super::buffer::replay_buffer;
use super::controller::PlaybackController;
use super::engine::{PlaybackEngine, PlaybackOutcome, PublisherTable};
use super::loader::PrefetchLoader;
use super::status::StatusHandle;

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackReport {
    #[serde(serialize_with = "outcome_name")]
    pub outcome: PlaybackOutcome,
    pub published: u64,
    pub publish_failures: u64,
    pub starvations: u64,
    pub skipped: u64,
    pub playing_time: Option<Timestamp>,
    /// Set when the loader stopped on a storage error
    pub loader_error: Option<String>,
}

fn outcome_name<S: serde::Serializer>(outcome: &PlaybackOutcome, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(match outcome {
        PlaybackOutcome::Completed => "completed",
        PlaybackOutcome::Quit => "quit",
        PlaybackOutcome::Cancelled => "cancelled",
    })
}

/// Create one publisher per announced topic.
pub fn prepare_publishers(
    topics: &[TopicMetadata],
    sink: &dyn PublishSink,
) -> Result<PublisherTable, ReplayError> {
    let mut table = PublisherTable::with_capacity(topics.len());
    for topic in topics {
        if table.contains_key(&topic.name) {
            warn!("Topic {} announced twice, keeping the first", topic.name);
            continue;
        }
        let publisher = sink
            .create_publisher(topic)
            .map_err(ReplayError::PublisherSetup)?;
        debug!("Publisher ready for {} ({})", topic.name, topic.type_name);
        table.insert(topic.name.clone(), publisher);
    }
    Ok(table)
}

/// Replay everything `reader` yields onto `sink`.
///
/// Options are validated before any task is started. The loader runs as its
/// own task under a child of `token`; the engine runs on the caller's task.
/// A storage error ends the stream early and is reported in
/// [`PlaybackReport::loader_error`], not returned.
pub async fn play<S>(
    reader: S,
    sink: &dyn PublishSink,
    options: PlayOptions,
    controller: PlaybackController,
    status: StatusHandle,
    token: CancellationToken,
) -> Result<PlaybackReport, ReplayError>
where
    S: StorageReader + 'static,
{
    options.validate()?;
    let publishers = prepare_publishers(&reader.list_topics(), sink)?;

    let (producer, consumer) = replay_buffer(options.read_ahead_queue_size);
    let loader_token = token.child_token();
    let loader = PrefetchLoader::new(reader, producer, options.clone(), loader_token.clone());
    let loader_handle = tokio::spawn(loader.run());

    info!(
        "Starting playback of {} topics, queue size {}, start offset {:?}",
        publishers.len(),
        options.read_ahead_queue_size,
        options.start_time
    );
    let engine = PlaybackEngine::new(
        consumer,
        publishers,
        controller,
        status,
        options.publish_error_policy,
        token,
    );
    let engine_result = engine.run().await;

    loader_token.cancel();
    let loader_result = loader_handle.await;
    let summary = engine_result?;

    let (skipped, loader_error) = match loader_result {
        Ok(Ok(loaded)) => (loaded.skipped, None),
        Ok(Err(e)) => (0, Some(e.to_string())),
        Err(e) => (0, Some(format!("loader task failed: {}", e))),
    };

    Ok(PlaybackReport {
        outcome: summary.outcome,
        published: summary.published,
        publish_failures: summary.publish_failures,
        starvations: summary.starvations,
        skipped,
        playing_time: summary.playing_time,
        loader_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bagplay_core::{MemoryStorage, PublishError, TopicPublisher};

    struct NullSink;

    struct Null;

    impl TopicPublisher for Null {
        fn publish(&self, _payload: &[u8]) -> Result<(), PublishError> {
            Ok(())
        }
    }

    impl PublishSink for NullSink {
        fn create_publisher(
            &self,
            topic: &TopicMetadata,
        ) -> Result<Box<dyn TopicPublisher>, PublishError> {
            if topic.type_name.is_empty() {
                return Err(PublishError::Setup {
                    topic: topic.name.clone(),
                    type_name: String::new(),
                    reason: "missing type".into(),
                });
            }
            Ok(Box::new(Null))
        }
    }

    #[test]
    fn test_prepare_publishers_dedups() {
        let topics = vec![
            TopicMetadata::new("/a", "t/A"),
            TopicMetadata::new("/b", "t/B"),
            TopicMetadata::new("/a", "t/A"),
        ];
        let table = prepare_publishers(&topics, &NullSink).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_prepare_publishers_setup_failure() {
        let topics = vec![TopicMetadata::new("/a", "")];
        let err = prepare_publishers(&topics, &NullSink).err().unwrap();
        assert!(matches!(err, ReplayError::PublisherSetup(PublishError::Setup { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_counts_unknown_topics() {
        let storage = MemoryStorage::new(
            vec![TopicMetadata::new("/known", "t/K")],
            vec![
                bagplay_core::Message::new("/known", 0, vec![]),
                bagplay_core::Message::new("/stray", 5, vec![]),
            ],
        );
        let report = play(
            storage,
            &NullSink,
            PlayOptions::default(),
            PlaybackController::new(),
            StatusHandle::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.outcome, PlaybackOutcome::Completed);
        assert_eq!(report.published, 1);
        assert_eq!(report.publish_failures, 1);
        assert_eq!(report.loader_error, None);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"], "completed");
        assert_eq!(json["publishFailures"], 1);
    }
}
