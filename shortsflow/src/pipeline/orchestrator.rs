//! Drives one topic through the fixed stage graph.

use super::failure_collector::FailureCollector;
use super::graph::StageGraph;
use super::outcome::{DrainError, PipelineOutcome};
use crate::cancellation::CancellationToken;
use crate::config::Settings;
use crate::core::{RunState, RunStatus, StageId};
use crate::domain::{MediaHandle, Narrative, PublishReceipt, Topic, VideoMetadata, VoiceTrack};
use crate::errors::{ConfigError, ErrorKind, PipelineError, WorkItemError};
use crate::events::{EventSink, NoOpEventSink, PIPELINE_COMPLETED, PIPELINE_STARTED, PIPELINE_STATE};
use crate::executor::{LeaseHook, StageExecutor, StageResult, StageSpec};
use crate::fallback::{FallbackChain, Tier};
use crate::observability::StageTimer;
use crate::ports::{
    AvatarRequest, BackupRequest, ComposeRequest, ImageRequest, MetadataRequest,
    NarrativeRequest, PromptRequest, TranscribeRequest, UploadRequest, VoiceRequest,
};
use crate::registry::{Capabilities, CapabilityRegistry, Named};
use crate::resource::{
    ResourceClaim, ResourceLeaseManager, OWNER_AVATAR, OWNER_DIFFUSION, OWNER_LLM, OWNER_WHISPER,
};
use crate::retry::run_with_retry;
use crate::work_item::WorkItem;
use chrono::{DateTime, TimeDelta, Utc};
use futures::future::join_all;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

/// A stage's produced value, before it is written to the work item.
enum Produced {
    Claimed,
    Narrative(Narrative),
    Metadata(VideoMetadata, Vec<String>),
    SceneImages(Vec<MediaHandle>),
    Voice(VoiceTrack),
    Avatar(MediaHandle),
    Subtitles(MediaHandle),
    Video(MediaHandle),
    Receipt(PublishReceipt),
    Backup(String),
    Notified,
}

impl Produced {
    fn commit(self, item: &mut WorkItem) -> Result<(), WorkItemError> {
        match self {
            Self::Claimed | Self::Notified => Ok(()),
            Self::Narrative(v) => item.set_narrative(v),
            Self::Metadata(metadata, prompts) => {
                item.set_metadata(metadata)?;
                item.set_image_prompts(prompts)
            }
            Self::SceneImages(v) => item.set_scene_images(v),
            Self::Voice(v) => item.set_voice(v),
            Self::Avatar(v) => item.set_avatar(v),
            Self::Subtitles(v) => item.set_subtitles(v),
            Self::Video(v) => item.set_composed_video(v),
            Self::Receipt(v) => item.set_publish_receipt(v),
            Self::Backup(v) => item.set_backup_location(v),
        }
    }
}

type Step = (StageResult, Option<Produced>);

/// Builds one tier per named engine, best first.
fn chain_of<T, I, O, F, Fut>(
    stage: StageId,
    engines: &[Named<T>],
    call: F,
) -> Result<FallbackChain<I, O>, PipelineError>
where
    T: ?Sized + Send + Sync + 'static,
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(Arc<T>, I) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<O, PipelineError>> + Send + 'static,
{
    let mut tiers = engines.iter().map(|named| {
        let engine = named.engine();
        let call = call.clone();
        Tier::new(named.name(), move |input| call(Arc::clone(&engine), input))
    });
    let first = tiers.next().ok_or_else(|| {
        PipelineError::permanent(
            ErrorKind::Configuration,
            format!("no engine configured for stage '{stage}'"),
        )
        .with_stage(stage)
    })?;
    Ok(tiers.fold(FallbackChain::new(first), FallbackChain::then))
}

/// Unloads every engine of one stage when its resident state is evicted.
fn unload_hook<T, F>(engines: &[Named<T>], unload: F) -> LeaseHook
where
    T: ?Sized + Send + Sync + 'static,
    F: Fn(&T) + Send + Sync + 'static,
{
    let engines: Vec<Arc<T>> = engines.iter().map(Named::engine).collect();
    Arc::new(move || {
        for engine in &engines {
            let engine: &T = engine;
            unload(engine);
        }
    })
}

/// Publication time `hours` from now, if representable.
fn schedule_after(hours: u32) -> Option<DateTime<Utc>> {
    TimeDelta::try_hours(i64::from(hours)).and_then(|delay| Utc::now().checked_add_signed(delay))
}

/// Runs topics end to end.
pub struct Orchestrator {
    caps: Capabilities,
    settings: Settings,
    executor: StageExecutor,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("caps", &self.caps)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator with its own lease manager.
    #[must_use]
    pub fn new(caps: Capabilities, settings: Settings) -> Self {
        Self {
            caps,
            settings,
            executor: StageExecutor::new(ResourceLeaseManager::new()),
            sink: Arc::new(NoOpEventSink),
        }
    }

    /// Resolves the configured engines from `registry`.
    pub fn from_registry(
        registry: &CapabilityRegistry,
        settings: Settings,
    ) -> Result<Self, ConfigError> {
        let caps = registry.resolve(&settings.engines)?;
        Ok(Self::new(caps, settings))
    }

    /// Sets the event sink for the orchestrator, its executor and its lease
    /// manager.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.executor.leases().set_event_sink(sink.clone());
        self.executor = self.executor.with_event_sink(sink.clone());
        self.sink = sink;
        self
    }

    /// Shares an existing lease manager, e.g. one owning a device handle.
    ///
    /// A sink set later with [`with_event_sink`](Self::with_event_sink) also
    /// replaces the manager's.
    #[must_use]
    pub fn with_leases(mut self, leases: ResourceLeaseManager) -> Self {
        self.executor = StageExecutor::new(leases).with_event_sink(self.sink.clone());
        self
    }

    /// Effective settings.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The lease manager.
    #[must_use]
    pub fn leases(&self) -> &ResourceLeaseManager {
        self.executor.leases()
    }

    /// Dequeues the next topic and runs it.
    ///
    /// Returns `Ok(None)` when the queue is empty. Queue read failures are
    /// retried under the fetch stage's retry spec; a read still pending when
    /// `cancel` fires is abandoned.
    pub async fn run_next(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<PipelineOutcome>, PipelineError> {
        let source = &self.caps.topics.engine();
        let retry = self.settings.retry_for(StageId::FetchTopic);
        let fetched = run_with_retry(&retry, cancel, move |_| async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => Err(PipelineError::cancelled(
                    cancel.reason().unwrap_or_else(|| "cancelled".to_string()),
                )),
                result = source.fetch_next() => result,
            }
        })
        .await
            .map_err(|exhausted| exhausted.last.with_stage(StageId::FetchTopic))?;

        match fetched.value {
            Some(topic) => Ok(Some(self.run(topic, cancel).await)),
            None => {
                info!("Topic queue is empty");
                Ok(None)
            }
        }
    }

    /// Runs queued topics one after another until the queue is empty or the
    /// token is cancelled.
    ///
    /// If a queue read fails, the outcomes of the topics already finished
    /// are returned inside the error.
    pub async fn drain(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<PipelineOutcome>, DrainError> {
        let mut outcomes = Vec::new();
        while !cancel.is_cancelled() {
            match self.run_next(cancel).await {
                Ok(Some(outcome)) => {
                    info!(status = %outcome.status(), topic = %outcome.topic().text(), "Topic finished");
                    outcomes.push(outcome);
                }
                Ok(None) => break,
                Err(source) => {
                    warn!(error = %source, finished = outcomes.len(), "Queue read failed, stopping drain");
                    return Err(DrainError {
                        completed: outcomes,
                        source,
                    });
                }
            }
        }
        Ok(outcomes)
    }

    /// Runs one topic through every stage group.
    pub async fn run(&self, mut topic: Topic, cancel: &CancellationToken) -> PipelineOutcome {
        topic.mark_processing();
        let item = WorkItem::new(topic.clone(), &self.settings.paths.output_dir);
        let span = info_span!("pipeline", run_id = %item.run_id());
        self.drive(topic, item, cancel).instrument(span).await
    }

    async fn drive(
        &self,
        mut topic: Topic,
        mut item: WorkItem,
        cancel: &CancellationToken,
    ) -> PipelineOutcome {
        let mut timer = StageTimer::start();
        let mut state = RunState::Pending;
        let mut states = vec![state.clone()];
        let mut collector = FailureCollector::new();
        let mut stages: Vec<StageResult> = Vec::new();

        info!(
            topic = %topic.text(),
            language = %topic.language,
            work_dir = %item.work_dir().display(),
            "Pipeline started"
        );
        self.sink.try_emit(
            PIPELINE_STARTED,
            Some(json!({
                "run_id": item.run_id().to_string(),
                "topic": topic.text(),
                "language": topic.language,
                "workspace_key": item.workspace_key(),
            })),
        );

        for group in StageGraph::groups() {
            if collector.should_stop() {
                break;
            }
            self.transition(&mut state, &mut states, RunState::Running(group.to_vec()));

            let progress = collector.run_status();
            let snapshot = &item;
            let steps = join_all(
                group
                    .iter()
                    .map(|&stage| self.run_stage(stage, snapshot, progress, cancel)),
            )
            .await;

            for (result, produced) in steps {
                let stage = result.stage();
                let result = match produced.map(|p| p.commit(&mut item)) {
                    Some(Err(e)) => StageResult::failed(stage, e.into()),
                    _ => result,
                };
                if let Err(e) = item.record_stage(stage, result.meta()) {
                    warn!(stage = %stage, error = %e, "Stage metadata already recorded");
                }
                timer.record(stage, result.elapsed());
                collector.record(&result);
                stages.push(result);
            }
        }

        let status = collector.run_status();
        let terminal = match status {
            RunStatus::Completed => RunState::Completed,
            RunStatus::Degraded => RunState::Degraded,
            RunStatus::Failed => RunState::Failed,
        };
        self.transition(&mut state, &mut states, terminal);

        let error = collector.fatal().map(|f| f.error.clone());
        match status {
            RunStatus::Failed => topic.mark_failed(),
            RunStatus::Completed | RunStatus::Degraded => topic.mark_done(),
        }
        self.settle_topic(&topic, status, error.as_ref()).await;

        let cancelled = error.as_ref().is_some_and(PipelineError::is_cancellation);
        let elapsed = timer.summary();
        let outcome = PipelineOutcome {
            run_id: item.run_id(),
            topic,
            status,
            work_item: if cancelled { None } else { Some(item) },
            stages,
            states,
            degraded: collector.degraded(),
            error,
            failures: collector.summary(),
            timings: timer.steps().to_vec(),
            elapsed,
        };

        info!(status = %status, degraded = ?outcome.degraded(), "Pipeline finished");
        self.sink.try_emit(PIPELINE_COMPLETED, Some(outcome.to_json()));
        outcome
    }

    fn transition(&self, state: &mut RunState, history: &mut Vec<RunState>, next: RunState) {
        if !state.can_transition_to(&next) {
            warn!(from = %state, to = %next, "Ignoring illegal run state transition");
            return;
        }
        debug!(from = %state, to = %next, "Run state changed");
        self.sink.try_emit(
            PIPELINE_STATE,
            Some(json!({ "from": state.to_string(), "to": next.to_string() })),
        );
        history.push(next.clone());
        *state = next;
    }

    async fn settle_topic(&self, topic: &Topic, status: RunStatus, error: Option<&PipelineError>) {
        let source = self.caps.topics.engine();
        let result = match status {
            RunStatus::Failed => {
                let reason = error.map_or_else(|| status.to_string(), ToString::to_string);
                source.mark_failed(topic, &reason).await
            }
            RunStatus::Completed | RunStatus::Degraded => source.mark_done(topic).await,
        };
        if let Err(e) = result {
            warn!(error = %e, "Could not update topic status");
        }
    }

    async fn run_stage(
        &self,
        stage: StageId,
        item: &WorkItem,
        progress: RunStatus,
        cancel: &CancellationToken,
    ) -> Step {
        let span = info_span!("stage", stage = %stage);
        match self.dispatch(stage, item, progress, cancel).instrument(span).await {
            Ok(step) => step,
            Err(error) => {
                warn!(stage = %stage, error = %error, "Stage could not start");
                (StageResult::failed(stage, error), None)
            }
        }
    }

    fn spec<I, O>(&self, stage: StageId, chain: FallbackChain<I, O>, owner: Option<&str>) -> StageSpec<I, O> {
        let spec = StageSpec::new(stage, chain).with_retry(&self.settings.retry_for(stage));
        match owner {
            Some(owner) => spec.with_resource(ResourceClaim::new(owner)),
            None => spec,
        }
    }

    async fn execute<I, O>(
        &self,
        spec: StageSpec<I, O>,
        input: I,
        cancel: &CancellationToken,
        wrap: impl FnOnce(O) -> Produced,
    ) -> Step
    where
        I: Clone,
    {
        let (value, record) = self.executor.execute(&spec, input, cancel).await.into_parts();
        (record, value.map(wrap))
    }

    #[allow(clippy::too_many_lines)]
    async fn dispatch(
        &self,
        stage: StageId,
        item: &WorkItem,
        progress: RunStatus,
        cancel: &CancellationToken,
    ) -> Result<Step, PipelineError> {
        let inputs = item.inputs_for(stage);
        let work_dir = item.work_dir();

        let step = match stage {
            StageId::FetchTopic => {
                let chain = chain_of(
                    stage,
                    std::slice::from_ref(&self.caps.topics),
                    |source, topic: Topic| async move { source.mark_processing(&topic).await },
                )?;
                // The fetch stage produces the topic field, so it reads the
                // item directly rather than through the causal guard.
                let topic = item.topic().clone();
                self.execute(self.spec(stage, chain, None), topic, cancel, |()| Produced::Claimed)
                    .await
            }
            StageId::GenerateNarrative => {
                let topic = inputs.topic()?;
                let bounds = self.settings.narrative;
                let request = NarrativeRequest {
                    topic: topic.text().to_string(),
                    language: topic.language,
                    min_words: bounds.min_words,
                    max_words: bounds.max_words,
                };
                let chain = chain_of(
                    stage,
                    &self.caps.narrative,
                    move |engine, request: NarrativeRequest| async move {
                        let narrative = engine.generate(request).await?;
                        narrative.validate(bounds.min_words, bounds.max_words)?;
                        Ok(narrative)
                    },
                )?;
                let spec = self
                    .spec(stage, chain, Some(OWNER_LLM))
                    .keep_resident(unload_hook(&self.caps.narrative, |e| e.unload()));
                self.execute(spec, request, cancel, Produced::Narrative).await
            }
            StageId::GenerateMetadata => {
                let topic = inputs.topic()?;
                let narrative = inputs.narrative()?;
                let request = (
                    MetadataRequest {
                        topic: topic.text().to_string(),
                        language: topic.language,
                        narrative: narrative.text.clone(),
                    },
                    PromptRequest {
                        narrative: narrative.text.clone(),
                        scene_count: self.settings.images.scene_count,
                    },
                );
                let chain = chain_of(
                    stage,
                    &self.caps.metadata,
                    |engine, (metadata, prompts): (MetadataRequest, PromptRequest)| async move {
                        let metadata = engine.generate_metadata(metadata).await?;
                        let prompts = engine.generate_image_prompts(prompts).await?;
                        Ok((metadata, prompts))
                    },
                )?;
                let spec = self
                    .spec(stage, chain, Some(OWNER_LLM))
                    .keep_resident(unload_hook(&self.caps.metadata, |e| e.unload()));
                self.execute(spec, request, cancel, |(m, p)| Produced::Metadata(m, p))
                    .await
            }
            StageId::GenerateImages => {
                let request = ImageRequest {
                    prompts: inputs.image_prompts()?.to_vec(),
                    output_dir: work_dir.join("images"),
                };
                let chain = chain_of(
                    stage,
                    &self.caps.image,
                    |engine, request: ImageRequest| async move { engine.generate(request).await },
                )?;
                let spec = self
                    .spec(stage, chain, Some(OWNER_DIFFUSION))
                    .keep_resident(unload_hook(&self.caps.image, |e| e.unload()));
                self.execute(spec, request, cancel, Produced::SceneImages).await
            }
            StageId::SynthesizeVoice => {
                let request = VoiceRequest {
                    text: inputs.narrative()?.text.clone(),
                    language: inputs.topic()?.language,
                    output_path: work_dir.join("voice.mp3"),
                };
                let chain = chain_of(
                    stage,
                    &self.caps.voice,
                    |engine, request: VoiceRequest| async move { engine.synthesize(request).await },
                )?;
                self.execute(self.spec(stage, chain, None), request, cancel, Produced::Voice)
                    .await
            }
            StageId::AnimateAvatar => {
                let request = AvatarRequest {
                    audio: inputs.voice()?.audio.clone(),
                    image_path: self.settings.paths.avatar_image_path.clone(),
                    output_path: work_dir.join("avatar.mp4"),
                };
                let animator = self.caps.avatar.engine();
                let panner = self.caps.avatar.engine();
                let chain = FallbackChain::new(Tier::new(
                    self.caps.avatar.name(),
                    move |request: AvatarRequest| {
                        let engine = Arc::clone(&animator);
                        async move { engine.animate(request).await }
                    },
                ))
                .then(Tier::new("static_pan", move |request: AvatarRequest| {
                    let engine = Arc::clone(&panner);
                    async move { engine.animate_static_pan(request).await }
                }));
                let spec = self.spec(stage, chain, Some(OWNER_AVATAR)).keep_resident(
                    unload_hook(std::slice::from_ref(&self.caps.avatar), |e| e.unload()),
                );
                self.execute(spec, request, cancel, Produced::Avatar).await
            }
            StageId::TranscribeSubtitles => {
                let request = TranscribeRequest {
                    audio: inputs.voice()?.audio.clone(),
                    language: inputs.topic()?.language,
                    model_size: self.settings.transcription.whisper_model_size.clone(),
                    output_path: work_dir.join("subtitles.srt"),
                };
                let mut tiers = self.settings.transcription.model_tiers().into_iter().map(|size| {
                    let engine = self.caps.transcriber.engine();
                    Tier::new(size.clone(), move |request: TranscribeRequest| {
                        let engine = Arc::clone(&engine);
                        let request = TranscribeRequest {
                            model_size: size.clone(),
                            ..request
                        };
                        async move { engine.transcribe(request).await }
                    })
                });
                let first = tiers.next().ok_or_else(|| {
                    PipelineError::for_stage(stage, false, "no model size configured")
                })?;
                let chain = tiers.fold(FallbackChain::new(first), FallbackChain::then);
                // Each tier loads a different model size, so none stays resident.
                let spec = self.spec(stage, chain, Some(OWNER_WHISPER)).on_release(
                    unload_hook(std::slice::from_ref(&self.caps.transcriber), |e| e.unload()),
                );
                self.execute(spec, request, cancel, Produced::Subtitles).await
            }
            StageId::ComposeVideo => {
                let voice = inputs.voice()?;
                let request = ComposeRequest {
                    avatar: inputs.avatar()?.clone(),
                    scene_images: inputs.scene_images()?.to_vec(),
                    audio: voice.audio.clone(),
                    subtitles: inputs.subtitles()?.cloned(),
                    output_path: work_dir.join("final.mp4"),
                    duration_secs: voice.duration_secs(),
                };
                let chain = chain_of(
                    stage,
                    &self.caps.composer,
                    |engine, request: ComposeRequest| async move { engine.compose(request).await },
                )?;
                self.execute(self.spec(stage, chain, None), request, cancel, Produced::Video)
                    .await
            }
            StageId::Upload => {
                if !self.settings.publish.auto_upload {
                    return Ok((self.executor.skip(stage, "auto_upload disabled"), None));
                }
                let metadata = inputs.metadata()?;
                let publish = &self.settings.publish;
                let scheduled_at = match publish.schedule_delay_hours {
                    Some(hours) => Some(schedule_after(hours).ok_or_else(|| {
                        PipelineError::for_stage(
                            stage,
                            false,
                            format!("publish delay of {hours} hours is out of range"),
                        )
                    })?),
                    None => None,
                };
                let request = UploadRequest {
                    video: inputs.composed_video()?.clone(),
                    title: metadata.title.clone(),
                    description: metadata.description.clone(),
                    tags: metadata.tags.clone(),
                    privacy: publish.privacy,
                    resumable: true,
                    chunk_size_bytes: publish.chunk_size_bytes,
                    scheduled_at,
                };
                let chain = chain_of(
                    stage,
                    std::slice::from_ref(&self.caps.publisher),
                    |engine, request: UploadRequest| async move { engine.upload(request).await },
                )?;
                self.execute(self.spec(stage, chain, None), request, cancel, Produced::Receipt)
                    .await
            }
            StageId::Backup => {
                let request = BackupRequest {
                    video: inputs.composed_video()?.clone(),
                    key: item.workspace_key().to_string(),
                };
                let chain = chain_of(
                    stage,
                    std::slice::from_ref(&self.caps.backup),
                    |engine, request: BackupRequest| async move { engine.save(request).await },
                )?;
                self.execute(self.spec(stage, chain, None), request, cancel, Produced::Backup)
                    .await
            }
            StageId::Notify => {
                let message = format!(
                    "Shorts run {progress}: {}\nVideo: {}",
                    inputs.metadata()?.title,
                    inputs.composed_video()?.path().display()
                );
                let chain = chain_of(
                    stage,
                    std::slice::from_ref(&self.caps.notifier),
                    |engine, message: String| async move { engine.send(message).await },
                )?;
                self.execute(self.spec(stage, chain, None), message, cancel, |()| Produced::Notified)
                    .await
            }
        };
        Ok(step)
    }
}
