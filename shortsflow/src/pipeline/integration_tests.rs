//! End-to-end orchestrator tests against scripted fakes.

#[cfg(test)]
mod tests {
    use crate::cancellation::CancellationToken;
    use crate::config::{RetrySettings, Settings};
    use crate::core::{RunState, RunStatus, StageId, StageStatus};
    use crate::domain::{Language, Topic, TopicStatus};
    use crate::errors::{ErrorKind, PipelineError};
    use crate::events::{
        CollectingEventSink, PIPELINE_COMPLETED, PIPELINE_STARTED, RESOURCE_EVICTED,
        STAGE_FALLBACK, STAGE_SKIPPED,
    };
    use crate::pipeline::{Orchestrator, PipelineOutcome};
    use crate::ports::{MockPublisher, MockTopicSource, Publisher, TopicSource};
    use crate::registry::Named;
    use crate::testing::{fast_settings, FakeEngines};
    use pretty_assertions::assert_eq;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    fn settings() -> Settings {
        fast_settings(Path::new("out"))
    }

    fn topic(text: &str) -> Topic {
        Topic::new(text, Language::English).unwrap()
    }

    async fn run(fakes: &FakeEngines, settings: Settings) -> PipelineOutcome {
        Orchestrator::new(fakes.capabilities(), settings)
            .run(topic("Why octopuses have three hearts"), &CancellationToken::new())
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path_completes() {
        let fakes = FakeEngines::new();
        let outcome = run(&fakes, settings()).await;

        assert_eq!(outcome.status(), RunStatus::Completed);
        assert!(outcome.degraded().is_empty());
        assert!(outcome.error().is_none());
        assert_eq!(outcome.topic().status(), TopicStatus::Done);
        assert_eq!(outcome.stages().len(), StageId::ALL.len());
        assert!(outcome.stages().iter().all(|r| r.status() == StageStatus::Success));

        let states = outcome.states();
        assert_eq!(states.first(), Some(&RunState::Pending));
        assert_eq!(states.last(), Some(&RunState::Completed));
        assert_eq!(states.len(), 10);

        let item = outcome.work_item().unwrap();
        assert!(item.narrative().is_some());
        assert_eq!(item.image_prompts().map(|p| p.len()), Some(1));
        assert_eq!(item.scene_images().map(|s| s.len()), Some(1));
        assert!(item.subtitles().is_some());
        assert_eq!(item.avatar_tier(), Some(1));
        assert_eq!(
            item.publish_receipt().map(|r| r.url.as_str()),
            Some("https://youtu.be/fake")
        );
        assert_eq!(
            item.backup_location(),
            Some(format!("drive://shorts/{}", item.workspace_key()).as_str())
        );
        assert!(item.work_dir().starts_with("out/en"));

        let messages = fakes.notifier.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("Why octopuses have three hearts"));
        assert!(messages[0].contains("final.mp4"));
        assert!(messages[0].contains("completed"));

        assert_eq!(fakes.topics.processing(), vec!["Why octopuses have three hearts"]);
        assert_eq!(fakes.topics.done(), vec!["Why octopuses have three hearts"]);
        assert!(fakes.topics.failed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_avatar_falls_back_to_static_pan() {
        let fakes = FakeEngines::new();
        fakes.avatar.animate_script().fail_next(
            3,
            PipelineError::transient(ErrorKind::AvatarAnimation, "CUDA out of memory"),
        );
        let sink = Arc::new(CollectingEventSink::new());
        let orchestrator =
            Orchestrator::new(fakes.capabilities(), settings()).with_event_sink(sink.clone());

        let outcome = orchestrator
            .run(topic("Why octopuses have three hearts"), &CancellationToken::new())
            .await;

        assert_eq!(outcome.status(), RunStatus::Completed);
        assert_eq!(outcome.work_item().unwrap().avatar_tier(), Some(2));
        assert_eq!(
            fakes.avatar.animate_script().calls() + fakes.avatar.static_pan_script().calls(),
            4
        );
        let avatar = outcome.stage(StageId::AnimateAvatar).unwrap();
        assert_eq!(avatar.tier_name(), Some("static_pan"));
        assert_eq!(avatar.total_attempts(), 4);
        assert_eq!(avatar.trail()[0].attempts, 3);

        assert_eq!(sink.events_of_type(STAGE_FALLBACK).len(), 1);
        let names = sink.names();
        assert_eq!(names.first().map(String::as_str), Some(PIPELINE_STARTED));
        assert_eq!(names.last().map(String::as_str), Some(PIPELINE_COMPLETED));
        assert_eq!(orchestrator.leases().stats().outstanding, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notification_failure_degrades() {
        let fakes = FakeEngines::new();
        fakes
            .notifier
            .script()
            .fail_always(PipelineError::transient(ErrorKind::Notification, "chat API down"));

        let outcome = run(&fakes, settings()).await;

        assert_eq!(outcome.status(), RunStatus::Degraded);
        assert_eq!(outcome.degraded(), &[StageId::Notify]);
        assert_eq!(outcome.states().last(), Some(&RunState::Degraded));
        assert_eq!(fakes.notifier.script().calls(), 3);
        assert!(outcome.work_item().is_some());
        assert_eq!(fakes.topics.done().len(), 1);
        assert_eq!(
            outcome.stage(StageId::Upload).map(|r| r.status()),
            Some(StageStatus::Success)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_composition_failure_never_uploads() {
        let fakes = FakeEngines::new();
        fakes
            .composer
            .script()
            .fail_always(PipelineError::transient(ErrorKind::VideoComposition, "ffmpeg crashed"));
        let mut publisher = MockPublisher::new();
        publisher.expect_upload().times(0);
        let mut caps = fakes.capabilities();
        let publisher: Arc<dyn Publisher> = Arc::new(publisher);
        caps.publisher = Named::new("youtube", publisher);

        let outcome = Orchestrator::new(caps, settings())
            .run(topic("Why octopuses have three hearts"), &CancellationToken::new())
            .await;

        assert_eq!(outcome.status(), RunStatus::Failed);
        let error = outcome.error().unwrap();
        assert_eq!(error.stage, Some(StageId::ComposeVideo));
        assert_eq!(error.kind, ErrorKind::VideoComposition);
        assert!(!error.retryable);
        assert!(outcome.stage(StageId::Upload).is_none());
        assert!(outcome.stage(StageId::Notify).is_none());
        assert_eq!(fakes.backup.script().calls(), 0);
        assert_eq!(outcome.topic().status(), TopicStatus::Failed);
        assert_eq!(fakes.topics.failed().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_ends_promptly() {
        let fakes = FakeEngines::new();
        fakes
            .voice
            .script()
            .fail_always(PipelineError::transient(ErrorKind::VoiceGeneration, "tts timeout"));
        let mut settings = settings();
        settings.stage_retry.insert(
            StageId::SynthesizeVoice,
            RetrySettings {
                jitter_fraction: 0.0,
                ..RetrySettings::default()
            },
        );
        let orchestrator = Orchestrator::new(fakes.capabilities(), settings);
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            canceller.cancel("operator shutdown");
        });

        let outcome = orchestrator
            .run(topic("Why octopuses have three hearts"), &token)
            .await;

        assert_eq!(outcome.status(), RunStatus::Failed);
        assert!(outcome.is_cancelled());
        assert_eq!(outcome.error().unwrap().kind, ErrorKind::Cancelled);
        assert!(outcome.work_item().is_none());
        assert!(outcome.elapsed() < Duration::from_secs(2));
        assert_eq!(fakes.voice.script().calls(), 1);
        assert_eq!(fakes.avatar.animate_script().calls(), 0);
        assert_eq!(orchestrator.leases().stats().outstanding, 0);
        assert_eq!(fakes.topics.failed().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_upload_disabled_skips_upload() {
        let fakes = FakeEngines::new();
        let sink = Arc::new(CollectingEventSink::new());
        let mut settings = settings();
        settings.publish.auto_upload = false;

        let outcome = Orchestrator::new(fakes.capabilities(), settings)
            .with_event_sink(sink.clone())
            .run(topic("Why octopuses have three hearts"), &CancellationToken::new())
            .await;

        assert_eq!(outcome.status(), RunStatus::Completed);
        assert_eq!(
            outcome.stage(StageId::Upload).map(|r| r.status()),
            Some(StageStatus::Skipped)
        );
        assert!(fakes.publisher.requests().is_empty());
        assert_eq!(sink.events_of_type(STAGE_SKIPPED).len(), 1);
        assert_eq!(outcome.failures().skipped_stages, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_subtitles_still_compose() {
        let fakes = FakeEngines::new();
        fakes
            .transcriber
            .script()
            .fail_always(PipelineError::transient(ErrorKind::Subtitle, "model crashed"));

        let outcome = run(&fakes, settings()).await;

        assert_eq!(outcome.status(), RunStatus::Degraded);
        assert_eq!(outcome.degraded(), &[StageId::TranscribeSubtitles]);
        let sizes = fakes.transcriber.model_sizes();
        assert_eq!(sizes.len(), 9);
        assert_eq!(sizes[0], "large-v3");
        assert_eq!(sizes[3], "medium");
        assert_eq!(sizes[8], "base");

        let requests = fakes.composer.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].subtitles.is_none());
        assert!(outcome.work_item().unwrap().subtitles().is_none());
        assert!(fakes.notifier.messages()[0].contains("degraded"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_sibling_lets_group_finish() {
        let fakes = FakeEngines::new();
        fakes
            .images
            .script()
            .fail_always(PipelineError::permanent(ErrorKind::ImageGeneration, "nsfw filter"));

        let outcome = run(&fakes, settings()).await;

        assert_eq!(outcome.status(), RunStatus::Failed);
        assert_eq!(fakes.images.script().calls(), 1);
        assert_eq!(fakes.voice.script().calls(), 1);
        assert_eq!(
            outcome.stage(StageId::SynthesizeVoice).map(|r| r.status()),
            Some(StageStatus::Success)
        );
        assert!(outcome.work_item().unwrap().voice().is_some());
        assert_eq!(fakes.avatar.animate_script().calls(), 0);
        assert!(outcome.stage(StageId::AnimateAvatar).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_narrative_is_not_retried() {
        let fakes = FakeEngines::new();
        fakes.narrative.set_words(5);

        let outcome = run(&fakes, settings()).await;

        assert_eq!(outcome.status(), RunStatus::Failed);
        assert_eq!(fakes.narrative.script().calls(), 1);
        let error = outcome.error().unwrap();
        assert_eq!(error.kind, ErrorKind::NarrativeGeneration);
        assert!(error.message.contains("too short"));
        assert_eq!(fakes.metadata.script().calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_upload_carries_publish_options() {
        let fakes = FakeEngines::new();
        let mut settings = settings();
        settings.publish.schedule_delay_hours = Some(6);

        let outcome = run(&fakes, settings).await;

        assert_eq!(outcome.status(), RunStatus::Completed);
        let requests = fakes.publisher.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].resumable);
        assert_eq!(requests[0].chunk_size_bytes, 10 * 1024 * 1024);
        assert!(requests[0].scheduled_at.is_some());
        assert_eq!(requests[0].title, "Why octopuses have three hearts");
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_processes_queue_in_order() {
        let fakes = FakeEngines::new();
        fakes.topics.push(topic("first topic"));
        fakes.topics.push(Topic::new("second topic", Language::Tamil).unwrap());
        let orchestrator = Orchestrator::from_registry(&fakes.registry(), settings()).unwrap();
        let token = CancellationToken::new();

        let outcomes = orchestrator.drain(&token).await.unwrap();

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].topic().text(), "first topic");
        assert_eq!(outcomes[1].topic().language, Language::Tamil);
        assert!(outcomes.iter().all(PipelineOutcome::is_success));
        assert_eq!(fakes.topics.done(), vec!["first topic", "second topic"]);
        assert!(orchestrator.run_next(&token).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_read_failure_is_retried() {
        let fakes = FakeEngines::new();
        fakes.topics.push(topic("only topic"));
        fakes
            .topics
            .script()
            .fail_next(2, PipelineError::transient(ErrorKind::TopicFetch, "sheet quota"));
        let orchestrator = Orchestrator::new(fakes.capabilities(), settings());

        let outcome = orchestrator
            .run_next(&CancellationToken::new())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.status(), RunStatus::Completed);
        assert_eq!(fakes.topics.script().calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_publish_delay_fails_upload() {
        let fakes = FakeEngines::new();
        let mut settings = settings();
        settings.publish.schedule_delay_hours = Some(u32::MAX);

        let outcome = run(&fakes, settings).await;

        assert_eq!(outcome.status(), RunStatus::Failed);
        let error = outcome.error().unwrap();
        assert_eq!(error.stage, Some(StageId::Upload));
        assert_eq!(error.kind, ErrorKind::Upload);
        assert!(error.message.contains("out of range"));
        assert!(fakes.publisher.requests().is_empty());
        assert_eq!(fakes.backup.script().calls(), 1);
        assert_eq!(fakes.topics.failed().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heavy_stages_evict_previous_resident() {
        let fakes = FakeEngines::new();
        let sink = Arc::new(CollectingEventSink::new());
        let orchestrator =
            Orchestrator::new(fakes.capabilities(), settings()).with_event_sink(sink.clone());

        let outcome = orchestrator
            .run(topic("Why octopuses have three hearts"), &CancellationToken::new())
            .await;

        assert_eq!(outcome.status(), RunStatus::Completed);
        let evictions: Vec<(String, String)> = sink
            .events_of_type(RESOURCE_EVICTED)
            .into_iter()
            .filter_map(|(_, data)| data)
            .map(|data| {
                let owner = |key: &str| data[key].as_str().unwrap_or_default().to_string();
                (owner("evicted"), owner("by"))
            })
            .collect();
        let expected: Vec<(String, String)> = [
            ("llm", "diffusion"),
            ("diffusion", "avatar"),
            ("avatar", "whisper"),
        ]
        .iter()
        .map(|(evicted, by)| ((*evicted).to_string(), (*by).to_string()))
        .collect();
        assert_eq!(evictions, expected);

        // Both language-model stages kept state under the same owner key.
        assert_eq!(fakes.narrative.script().unloads(), 1);
        assert_eq!(fakes.metadata.script().unloads(), 1);
        assert_eq!(fakes.images.script().unloads(), 1);
        assert_eq!(fakes.avatar.animate_script().unloads(), 1);
        assert_eq!(fakes.transcriber.script().unloads(), 1);

        let stats = orchestrator.leases().stats();
        assert_eq!(stats.evictions, 3);
        assert_eq!(stats.outstanding, 0);
        assert!(orchestrator.leases().resident_owner().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_abandons_hung_queue_read() {
        let fakes = FakeEngines::new();
        fakes.topics.push(topic("never fetched"));
        fakes.topics.script().set_delay(Duration::from_secs(3600));
        let orchestrator = Orchestrator::new(fakes.capabilities(), settings());
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel("operator shutdown");
        });

        let started = tokio::time::Instant::now();
        let error = orchestrator.run_next(&token).await.unwrap_err();

        assert!(error.is_cancellation());
        assert_eq!(error.stage, Some(StageId::FetchTopic));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(fakes.topics.script().calls(), 1);
        assert!(fakes.topics.processing().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_returns_finished_outcomes_when_queue_read_fails() {
        let fakes = FakeEngines::new();
        let mut source = MockTopicSource::new();
        let mut served = false;
        source.expect_fetch_next().times(2).returning(move || {
            if served {
                Err(PipelineError::permanent(ErrorKind::TopicFetch, "sheet deleted"))
            } else {
                served = true;
                Ok(Some(topic("first topic")))
            }
        });
        source.expect_mark_processing().times(1).returning(|_| Ok(()));
        source.expect_mark_done().times(1).returning(|_| Ok(()));
        let mut caps = fakes.capabilities();
        let source: Arc<dyn TopicSource> = Arc::new(source);
        caps.topics = Named::new("sheets", source);

        let err = Orchestrator::new(caps, settings())
            .drain(&CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.completed.len(), 1);
        assert_eq!(err.completed[0].topic().text(), "first topic");
        assert!(err.completed[0].is_success());
        assert_eq!(err.source.kind, ErrorKind::TopicFetch);
        assert_eq!(err.source.stage, Some(StageId::FetchTopic));
    }
}
