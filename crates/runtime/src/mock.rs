//! Deterministic stand-in inference engine.
//!
//! Produces one tone per text fragment so the whole serving path can run
//! without model weights. Every model records what was asked of it in a
//! [`MockModelProbe`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use text_splitter::SplitterRegistry;
use tracing::debug;
use tts_core::{
    AudioChunk, ChunkIter, ComputeDevice, InferenceRequest, ModelConfig, Precision, TtsEngine,
    TtsError, TtsModel, TtsResult,
};

/// Output sample rate of mock models.
pub const MOCK_SAMPLE_RATE: u32 = 32000;

/// Tone length per spoken character.
const MS_PER_CHAR: f32 = 60.0;

#[derive(Debug, Default)]
struct ProbeState {
    device_moves: AtomicUsize,
    precision_changes: AtomicUsize,
    runs: AtomicUsize,
    chunks_produced: AtomicUsize,
    fail_precision: AtomicBool,
    fail_at_chunk: AtomicUsize,
    gpt_weights: Mutex<Option<PathBuf>>,
    sovits_weights: Mutex<Option<PathBuf>>,
    ref_audio: Mutex<Option<PathBuf>>,
}

/// Shared view of one mock model's activity.
#[derive(Debug, Clone)]
pub struct MockModelProbe(Arc<ProbeState>);

impl MockModelProbe {
    fn new() -> Self {
        let state = ProbeState::default();
        state.fail_at_chunk.store(usize::MAX, Ordering::SeqCst);
        Self(Arc::new(state))
    }

    pub fn device_moves(&self) -> usize {
        self.0.device_moves.load(Ordering::SeqCst)
    }

    pub fn precision_changes(&self) -> usize {
        self.0.precision_changes.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> usize {
        self.0.runs.load(Ordering::SeqCst)
    }

    pub fn chunks_produced(&self) -> usize {
        self.0.chunks_produced.load(Ordering::SeqCst)
    }

    /// Make precision changes fail until reset.
    pub fn fail_precision_changes(&self, fail: bool) {
        self.0.fail_precision.store(fail, Ordering::SeqCst);
    }

    /// Make the chunk with this index fail.
    pub fn fail_at_chunk(&self, index: usize) {
        self.0.fail_at_chunk.store(index, Ordering::SeqCst);
    }

    pub fn gpt_weights(&self) -> Option<PathBuf> {
        self.0.gpt_weights.lock().clone()
    }

    pub fn sovits_weights(&self) -> Option<PathBuf> {
        self.0.sovits_weights.lock().clone()
    }

    pub fn ref_audio(&self) -> Option<PathBuf> {
        self.0.ref_audio.lock().clone()
    }
}

/// Engine that builds [`MockModel`]s and counts constructions.
#[derive(Debug)]
pub struct MockEngine {
    splitter: Arc<SplitterRegistry>,
    load_delay: Duration,
    loads: AtomicUsize,
    fail_loads: AtomicBool,
    probes: Mutex<Vec<MockModelProbe>>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    /// Create an engine with the built-in split methods and instant loads.
    pub fn new() -> Self {
        Self {
            splitter: Arc::new(SplitterRegistry::new()),
            load_delay: Duration::ZERO,
            loads: AtomicUsize::new(0),
            fail_loads: AtomicBool::new(false),
            probes: Mutex::new(Vec::new()),
        }
    }

    /// Block each load for `delay`, standing in for weight loading.
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// Share a split method registry with the rest of the service.
    pub fn with_splitter(mut self, splitter: Arc<SplitterRegistry>) -> Self {
        self.splitter = splitter;
        self
    }

    /// Number of models constructed.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Make subsequent loads fail until reset.
    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    /// Probe of the most recently built model.
    pub fn last_probe(&self) -> Option<MockModelProbe> {
        self.probes.lock().last().cloned()
    }
}

impl TtsEngine for MockEngine {
    fn load(&self, config: &ModelConfig) -> TtsResult<Box<dyn TtsModel>> {
        if !self.load_delay.is_zero() {
            std::thread::sleep(self.load_delay);
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(TtsError::inference(format!("failed to load {}", config.id)));
        }

        let probe = MockModelProbe::new();
        self.probes.lock().push(probe.clone());
        debug!(config = %config.id, device = %config.device, "mock model loaded");

        Ok(Box::new(MockModel {
            splitter: Arc::clone(&self.splitter),
            probe,
        }))
    }
}

/// Model that renders each fragment as a short sine tone.
#[derive(Debug)]
pub struct MockModel {
    splitter: Arc<SplitterRegistry>,
    probe: MockModelProbe,
}

impl TtsModel for MockModel {
    fn set_device(&mut self, _device: ComputeDevice) -> TtsResult<()> {
        self.probe.0.device_moves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_precision(&mut self, _precision: Precision) -> TtsResult<()> {
        if self.probe.0.fail_precision.load(Ordering::SeqCst) {
            return Err(TtsError::inference("precision change rejected"));
        }
        self.probe.0.precision_changes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn run(&mut self, request: &InferenceRequest) -> TtsResult<ChunkIter> {
        self.probe.0.runs.fetch_add(1, Ordering::SeqCst);
        if !request.ref_audio_path.exists() {
            return Err(TtsError::inference(format!(
                "reference audio not found: {}",
                request.ref_audio_path.display()
            )));
        }

        let fragments = self
            .splitter
            .split(&request.text_split_method, &request.text)?;
        if fragments.is_empty() {
            return Err(TtsError::inference("no speakable text after splitting"));
        }

        let speed = if request.speed_factor > 0.0 {
            request.speed_factor
        } else {
            1.0
        };
        let gap = (request.fragment_interval.max(0.0) * MOCK_SAMPLE_RATE as f32) as usize;
        let probe = self.probe.clone();

        if !request.return_fragment {
            let mut samples = Vec::new();
            for (i, fragment) in fragments.iter().enumerate() {
                if i > 0 {
                    samples.resize(samples.len() + gap, 0);
                }
                samples.extend(tone(fragment, i, speed));
            }
            probe.0.chunks_produced.fetch_add(1, Ordering::SeqCst);
            let chunk = AudioChunk::new(samples, MOCK_SAMPLE_RATE);
            return Ok(Box::new(std::iter::once(Ok(chunk))));
        }

        let chunks = fragments.into_iter().enumerate().map(move |(i, fragment)| {
            if i == probe.0.fail_at_chunk.load(Ordering::SeqCst) {
                return Err(TtsError::inference(format!("synthesis failed at fragment {i}")));
            }
            probe.0.chunks_produced.fetch_add(1, Ordering::SeqCst);
            let mut samples = tone(&fragment, i, speed);
            samples.resize(samples.len() + gap, 0);
            Ok(AudioChunk::new(samples, MOCK_SAMPLE_RATE))
        });
        Ok(Box::new(chunks))
    }

    fn load_gpt_weights(&mut self, path: &Path) -> TtsResult<()> {
        *self.probe.0.gpt_weights.lock() = Some(path.to_path_buf());
        Ok(())
    }

    fn load_sovits_weights(&mut self, path: &Path) -> TtsResult<()> {
        *self.probe.0.sovits_weights.lock() = Some(path.to_path_buf());
        Ok(())
    }

    fn set_ref_audio(&mut self, path: &Path) -> TtsResult<()> {
        if !path.exists() {
            return Err(TtsError::inference(format!(
                "reference audio not found: {}",
                path.display()
            )));
        }
        *self.probe.0.ref_audio.lock() = Some(path.to_path_buf());
        Ok(())
    }
}

/// Sine tone whose length follows the fragment's character count.
fn tone(fragment: &str, index: usize, speed: f32) -> Vec<i16> {
    let chars = fragment.chars().filter(|c| !c.is_whitespace()).count().max(1);
    let len = (chars as f32 * MS_PER_CHAR / speed * MOCK_SAMPLE_RATE as f32 / 1000.0) as usize;
    let freq = 220.0 + 40.0 * (index % 8) as f32;
    let step = 2.0 * std::f32::consts::PI * freq / MOCK_SAMPLE_RATE as f32;
    (0..len)
        .map(|n| ((n as f32 * step).sin() * 0.25 * i16::MAX as f32) as i16)
        .collect()
}
