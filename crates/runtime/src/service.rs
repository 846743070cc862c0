//! Request orchestration.
//!
//! A synthesis request moves through these stages:
//!
//! ```text
//! Received -> SpeakerResolved? -> Validated -> InstanceAcquired -> Promoted
//!          -> Inferring -> Packaging -> Completed
//! ```
//!
//! Any stage can fail. Nothing touches the model cache or a device before
//! validation passes, and once an instance has been acquired its demotion
//! is always attempted, whether inference succeeded or not.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, instrument, warn, Span};
use uuid::Uuid;

use audio_pack::{AudioPackager, FfmpegEncoder};
use text_splitter::SplitterRegistry;
use tts_core::{
    AudioChunk, InferenceRequest, MediaType, ModelConfig, ModelConfigId, Precision, Residency,
    RuntimeConfig, StreamDemotePolicy, SynthesisRequest, TtsEngine, TtsError, TtsResult,
};

use crate::cache::ModelCache;
use crate::control::ControlHandle;
use crate::device::{DeviceManager, Lease};
use crate::instance::ModelInstance;
use crate::metrics::TtsMetrics;
use crate::mock::MockEngine;
use crate::speakers::SpeakerRegistry;
use crate::validate::validate;

/// Packaged audio bytes, delivered as they are produced.
pub type AudioStream = Pin<Box<dyn Stream<Item = TtsResult<Bytes>> + Send>>;

/// Result of a successful synthesis.
pub enum SynthesisOutput {
    /// One complete file.
    Buffered { media_type: MediaType, audio: Bytes },
    /// Chunks in production order. An error item ends the stream.
    Streaming {
        media_type: MediaType,
        stream: AudioStream,
    },
}

impl std::fmt::Debug for SynthesisOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buffered { media_type, audio } => f
                .debug_struct("Buffered")
                .field("media_type", media_type)
                .field("bytes", &audio.len())
                .finish(),
            Self::Streaming { media_type, .. } => f
                .debug_struct("Streaming")
                .field("media_type", media_type)
                .finish_non_exhaustive(),
        }
    }
}

impl SynthesisOutput {
    pub fn media_type(&self) -> MediaType {
        match self {
            Self::Buffered { media_type, .. } | Self::Streaming { media_type, .. } => *media_type,
        }
    }

    /// HTTP content type of the audio.
    pub fn content_type(&self) -> String {
        self.media_type().content_type()
    }
}

/// Where a request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    SpeakerResolved,
    Validated,
    InstanceAcquired,
    Promoted,
    Inferring,
    Packaging,
    Completed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::SpeakerResolved => "speaker_resolved",
            Stage::Validated => "validated",
            Stage::InstanceAcquired => "instance_acquired",
            Stage::Promoted => "promoted",
            Stage::Inferring => "inferring",
            Stage::Packaging => "packaging",
            Stage::Completed => "completed",
        }
    }
}

/// Snapshot of one cached instance.
#[derive(Debug, Clone, Serialize)]
pub struct CachedModel {
    pub config: ModelConfigId,
    pub residency: Residency,
    pub precision: Precision,
}

/// The serving front end: owns the model cache, device manager, and speaker
/// registry, and runs synthesis requests through them.
pub struct TtsService {
    config: RuntimeConfig,
    cache: ModelCache,
    devices: DeviceManager,
    speakers: Arc<SpeakerRegistry>,
    splitter: Arc<SplitterRegistry>,
    packager: AudioPackager,
    control: ControlHandle,
    permits: Arc<Semaphore>,
    metrics: TtsMetrics,
}

impl std::fmt::Debug for TtsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtsService")
            .field("cache", &self.cache)
            .field("speakers", &self.speakers.root())
            .finish_non_exhaustive()
    }
}

impl TtsService {
    /// Create a service around an inference engine.
    pub fn new(
        config: RuntimeConfig,
        engine: Arc<dyn TtsEngine>,
        splitter: Arc<SplitterRegistry>,
        metrics: TtsMetrics,
    ) -> Self {
        info!(
            cache_capacity = config.cache_capacity,
            stream_demote = ?config.stream_demote,
            speaker_dir = %config.speaker_dir.display(),
            "initializing tts service"
        );
        Self {
            cache: ModelCache::new(engine, config.cache_capacity, metrics),
            devices: DeviceManager::new(config.host_precision, metrics),
            speakers: Arc::new(SpeakerRegistry::new(config.speaker_dir.clone())),
            packager: AudioPackager::new(FfmpegEncoder::new(config.ffmpeg_path.clone())),
            control: ControlHandle::new(),
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            splitter,
            metrics,
            config,
        }
    }

    /// Create a service backed by the tone-generating mock engine.
    pub fn new_mock(config: RuntimeConfig) -> Self {
        let splitter = Arc::new(SplitterRegistry::new());
        let engine = Arc::new(MockEngine::new().with_splitter(Arc::clone(&splitter)));
        Self::new(config, engine, splitter, TtsMetrics::init_noop())
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    pub fn devices(&self) -> &DeviceManager {
        &self.devices
    }

    pub fn speakers(&self) -> &SpeakerRegistry {
        &self.speakers
    }

    pub fn splitter(&self) -> &SplitterRegistry {
        &self.splitter
    }

    pub fn control(&self) -> &ControlHandle {
        &self.control
    }

    /// Ask the host process to restart.
    pub fn request_restart(&self) {
        self.control.request_restart();
    }

    /// Ask the host process to exit.
    pub fn request_shutdown(&self) {
        self.control.request_shutdown();
    }

    /// Read the model configuration at `path`, or the default one.
    pub async fn resolve_config(&self, path: Option<&str>) -> TtsResult<ModelConfig> {
        let path = path
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| self.config.default_model_config.clone());
        load_config(path).await
    }

    /// State of every built instance, most recently used first.
    pub fn cached_models(&self) -> Vec<CachedModel> {
        self.cache
            .ids()
            .into_iter()
            .filter_map(|id| self.cache.peek(&id))
            .map(|instance| {
                let state = instance.state();
                CachedModel {
                    config: instance.id().clone(),
                    residency: state.residency(),
                    precision: state.precision,
                }
            })
            .collect()
    }

    /// Run one synthesis request.
    ///
    /// Streaming requests return once the first chunk is packaged, so a
    /// failure before any audio exists is still reported as an error here.
    #[instrument(
        skip_all,
        fields(
            request_id = %Uuid::new_v4(),
            streaming = request.streaming_mode,
            media_type = %request.media_type,
        )
    )]
    pub async fn synthesize(&self, request: SynthesisRequest) -> TtsResult<SynthesisOutput> {
        let start = Instant::now();
        self.metrics.request_received();

        let mut stage = Stage::Received;
        let result = self.run_request(request, start, &mut stage).await;
        if let Err(e) = &result {
            self.metrics.request_failed(e.kind());
            warn!(stage = stage.as_str(), kind = e.kind().as_str(), error = %e, "synthesis failed");
        }
        result
    }

    async fn run_request(
        &self,
        mut request: SynthesisRequest,
        start: Instant,
        stage: &mut Stage,
    ) -> TtsResult<SynthesisOutput> {
        if let Some(name) = request.speaker.take().filter(|s| !s.is_empty()) {
            let speakers = Arc::clone(&self.speakers);
            let lookup = name.clone();
            let (profile, audio) = tokio::task::spawn_blocking(move || {
                speakers
                    .resolve(&lookup)
                    .map(|profile| (profile, speakers.audio_path(&lookup)))
            })
            .await
            .map_err(|e| TtsError::internal(format!("speaker lookup failed: {e}")))??;
            request.ref_audio_path = Some(audio.to_string_lossy().into_owned());
            request.prompt_text = profile.prompt_text.unwrap_or_default();
            request.prompt_lang = Some(profile.prompt_lang.unwrap_or_default());
            *stage = Stage::SpeakerResolved;
            debug!(speaker = %name, "speaker resolved");
        }
        request.normalize_langs();

        let config = self
            .resolve_config(request.tts_infer_yaml_path.as_deref())
            .await?;
        let media_type = validate(&request, &config, &self.splitter)?;
        let inference = InferenceRequest::from_request(&request)?;
        *stage = Stage::Validated;

        info!(
            config = %config.id,
            text_len = inference.text.len(),
            text_lang = %inference.text_lang,
            "processing synthesis request"
        );

        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| TtsError::internal("synthesis limiter closed"))?;
        let instance = self.cache.acquire(&config).await?;
        let lease = self.devices.lease(instance);
        *stage = Stage::InstanceAcquired;

        if request.streaming_mode {
            self.stream(lease, inference, media_type, permit, start, stage)
                .await
        } else {
            self.buffered(lease, inference, media_type, permit, start, stage)
                .await
        }
    }

    async fn buffered(
        &self,
        lease: Lease,
        inference: InferenceRequest,
        media_type: MediaType,
        permit: OwnedSemaphorePermit,
        start: Instant,
        stage: &mut Stage,
    ) -> TtsResult<SynthesisOutput> {
        self.metrics.active_requests_delta(1.0);
        let joined = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let mut reached = Stage::InstanceAcquired;
            let result = lease.promote().and_then(|()| {
                reached = Stage::Promoted;
                let chunks = lease.instance().run(&inference)?;
                reached = Stage::Inferring;
                chunks.collect::<TtsResult<Vec<AudioChunk>>>()
            });
            let result = match (result, lease.finish(true)) {
                (Ok(_), Err(demote_err)) => Err(demote_err),
                (Err(e), Err(demote_err)) => {
                    warn!(error = %demote_err, "demote after failed inference also failed");
                    Err(e)
                }
                (result, Ok(())) => result,
            };
            (reached, result)
        })
        .await;
        self.metrics.active_requests_delta(-1.0);
        let (reached, result) =
            joined.map_err(|e| TtsError::internal(format!("synthesis task failed: {e}")))?;

        *stage = reached;
        let chunks = result?;

        *stage = Stage::Packaging;
        let audio = self.packager.pack_buffered(&chunks, media_type).await?;

        *stage = Stage::Completed;
        let ms = start.elapsed().as_secs_f64() * 1000.0;
        self.metrics.record_time_to_first_chunk(ms);
        self.metrics.record_total_latency(ms);
        self.metrics.request_completed(media_type);
        info!(bytes = audio.len(), total_ms = ms, "synthesis completed");

        Ok(SynthesisOutput::Buffered { media_type, audio })
    }

    async fn stream(
        &self,
        lease: Lease,
        inference: InferenceRequest,
        media_type: MediaType,
        permit: OwnedSemaphorePermit,
        start: Instant,
        stage: &mut Stage,
    ) -> TtsResult<SynthesisOutput> {
        let (tx, rx) = mpsc::channel::<TtsResult<AudioChunk>>(self.config.stream_buffer.max(1));
        let policy = self.config.stream_demote;
        let metrics = self.metrics;
        let span = Span::current();

        metrics.active_requests_delta(1.0);
        tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            let _permit = permit;
            let mut finished = false;

            match lease
                .promote()
                .and_then(|()| lease.instance().run(&inference))
            {
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                }
                Ok(chunks) => {
                    finished = true;
                    for item in chunks {
                        let failed = item.is_err();
                        if tx.blocking_send(item).is_err() {
                            debug!("client disconnected, stopping synthesis");
                            finished = false;
                            break;
                        }
                        if failed {
                            finished = false;
                            break;
                        }
                    }
                }
            }

            let keep_hot = finished && policy == StreamDemotePolicy::KeepHot;
            if keep_hot {
                debug!(config = %lease.instance().id(), "stream finished, instance kept hot");
            }
            if let Err(e) = lease.finish(!keep_hot) {
                warn!(error = %e, "demote after stream failed");
                let _ = tx.blocking_send(Err(e));
            }
            metrics.active_requests_delta(-1.0);
        });

        *stage = Stage::Inferring;
        let packer = self.packager.stream(media_type);
        let mut stream = package_stream(rx, packer, metrics, start, Span::current()).boxed();

        match stream.next().await {
            Some(Ok(first)) => {
                *stage = Stage::Packaging;
                metrics.record_time_to_first_chunk(start.elapsed().as_secs_f64() * 1000.0);
                let stream = futures::stream::once(async move { Ok(first) }).chain(stream);
                Ok(SynthesisOutput::Streaming {
                    media_type,
                    stream: Box::pin(stream),
                })
            }
            Some(Err(e)) => Err(e),
            None => Err(TtsError::inference("engine produced no audio")),
        }
    }

    /// Replace the text-to-semantic weights of a cached instance.
    pub async fn set_gpt_weights(&self, config_path: Option<&str>, weights: &str) -> TtsResult<()> {
        let weights = PathBuf::from(weights);
        self.with_instance(config_path, move |instance| instance.load_gpt_weights(&weights))
            .await
    }

    /// Replace the vocoder weights of a cached instance.
    pub async fn set_sovits_weights(&self, config_path: Option<&str>, weights: &str) -> TtsResult<()> {
        let weights = PathBuf::from(weights);
        self.with_instance(config_path, move |instance| instance.load_sovits_weights(&weights))
            .await
    }

    /// Set the default reference audio of a cached instance.
    pub async fn set_refer_audio(&self, config_path: Option<&str>, audio: &str) -> TtsResult<()> {
        let audio = PathBuf::from(audio);
        self.with_instance(config_path, move |instance| instance.set_ref_audio(&audio))
            .await
    }

    async fn with_instance<F>(&self, config_path: Option<&str>, f: F) -> TtsResult<()>
    where
        F: FnOnce(&ModelInstance) -> TtsResult<()> + Send + 'static,
    {
        let config = self.resolve_config(config_path).await?;
        let instance = self.cache.acquire(&config).await?;
        tokio::task::spawn_blocking(move || f(&instance))
            .await
            .map_err(|e| TtsError::internal(format!("model task failed: {e}")))?
    }

    /// Build the instance for `path` and park it on the host.
    pub async fn preload(&self, path: &Path) -> TtsResult<ModelConfigId> {
        let config = load_config(path.to_path_buf()).await?;
        let instance = self.cache.acquire(&config).await?;
        let devices = self.devices.clone();
        tokio::task::spawn_blocking(move || devices.demote(&instance))
            .await
            .map_err(|e| TtsError::internal(format!("demote task failed: {e}")))??;
        Ok(config.id)
    }
}

async fn load_config(path: PathBuf) -> TtsResult<ModelConfig> {
    tokio::task::spawn_blocking(move || ModelConfig::load(&ModelConfigId::resolve(path)))
        .await
        .map_err(|e| TtsError::internal(format!("config load task failed: {e}")))?
}

struct Packaging {
    rx: mpsc::Receiver<TtsResult<AudioChunk>>,
    packer: audio_pack::StreamPacker,
    delivered: usize,
}

/// Package chunks from `rx` in order; the first error ends the stream.
fn package_stream(
    rx: mpsc::Receiver<TtsResult<AudioChunk>>,
    packer: audio_pack::StreamPacker,
    metrics: TtsMetrics,
    start: Instant,
    span: Span,
) -> impl Stream<Item = TtsResult<Bytes>> + Send {
    let state = Packaging {
        rx,
        packer,
        delivered: 0,
    };
    futures::stream::unfold(Some(state), move |state| {
        let span = span.clone();
        async move {
            let mut state = state?;
            let packed = match state.rx.recv().await {
                None => {
                    if state.delivered > 0 {
                        let ms = start.elapsed().as_secs_f64() * 1000.0;
                        metrics.record_total_latency(ms);
                        metrics.request_completed(state.packer.media_type());
                        info!(parent: &span, chunks = state.delivered, total_ms = ms, "stream completed");
                    }
                    return None;
                }
                Some(Ok(chunk)) => state.packer.pack(&chunk).await,
                Some(Err(e)) => Err(e),
            };

            match packed {
                Ok(bytes) => {
                    state.delivered += 1;
                    Some((Ok(bytes), Some(state)))
                }
                Err(e) => {
                    // Errors before the first chunk are reported by the caller.
                    if state.delivered > 0 {
                        metrics.request_failed(e.kind());
                        warn!(parent: &span, chunks = state.delivered, error = %e, "stream aborted");
                    }
                    Some((Err(e), None))
                }
            }
        }
    })
}
