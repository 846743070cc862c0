//! Core data types shared by the serving layers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{TtsError, TtsResult};

/// Output container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    /// RIFF/WAVE, 16-bit mono.
    #[default]
    Wav,
    /// Headerless 16-bit little-endian PCM.
    Raw,
    /// Ogg Vorbis.
    Ogg,
    /// AAC in ADTS framing.
    Aac,
}

impl MediaType {
    /// Lowercase name as used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Wav => "wav",
            MediaType::Raw => "raw",
            MediaType::Ogg => "ogg",
            MediaType::Aac => "aac",
        }
    }

    /// HTTP content type for this container.
    pub fn content_type(&self) -> String {
        format!("audio/{}", self.as_str())
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = TtsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wav" => Ok(Self::Wav),
            "raw" => Ok(Self::Raw),
            "ogg" => Ok(Self::Ogg),
            "aac" => Ok(Self::Aac),
            _ => Err(TtsError::invalid_input("media_type is not supported")),
        }
    }
}

/// Identity of a model configuration; the model cache key.
///
/// Two paths naming the same file resolve to the same identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelConfigId(PathBuf);

impl ModelConfigId {
    /// Resolve a configuration path to its identity.
    ///
    /// Existing files are canonicalized; anything else keeps the path as given.
    pub fn resolve(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::canonicalize(path) {
            Ok(canonical) => Self(canonical),
            Err(_) => Self(path.to_path_buf()),
        }
    }

    /// Path of the configuration file.
    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for ModelConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Compute device a model can reside on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ComputeDevice {
    /// Host memory.
    #[default]
    Cpu,
    /// NVIDIA GPU with ordinal.
    Cuda(usize),
    /// Apple GPU.
    Metal,
}

impl ComputeDevice {
    /// Whether this device is an accelerator.
    pub fn is_accelerator(&self) -> bool {
        !matches!(self, ComputeDevice::Cpu)
    }
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeDevice::Cpu => write!(f, "cpu"),
            ComputeDevice::Cuda(index) => write!(f, "cuda:{index}"),
            ComputeDevice::Metal => write!(f, "mps"),
        }
    }
}

impl FromStr for ComputeDevice {
    type Err = TtsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        match lower.as_str() {
            "cpu" => return Ok(Self::Cpu),
            "cuda" | "gpu" => return Ok(Self::Cuda(0)),
            "mps" | "metal" => return Ok(Self::Metal),
            _ => {}
        }
        if let Some(index) = lower.strip_prefix("cuda:") {
            let index = index
                .parse()
                .map_err(|_| TtsError::config(format!("invalid cuda device index: {s}")))?;
            return Ok(Self::Cuda(index));
        }
        Err(TtsError::config(format!("unknown device: {s}")))
    }
}

impl Serialize for ComputeDevice {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ComputeDevice {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Numeric precision of a loaded model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// 32-bit floating point.
    #[default]
    Full,
    /// 16-bit floating point.
    Reduced,
}

impl Precision {
    /// Precision implied by an `is_half` flag.
    pub fn from_half(is_half: bool) -> Self {
        if is_half {
            Precision::Reduced
        } else {
            Precision::Full
        }
    }
}

/// Where a model instance currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Residency {
    /// Occupying accelerator memory.
    OnAccelerator,
    /// Parked in host memory.
    OnHost,
}

/// A chunk of synthesized audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// PCM samples (i16, mono).
    pub samples: Arc<[i16]>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioChunk {
    /// Create a new audio chunk.
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    /// Create a chunk from float samples in `[-1.0, 1.0]`.
    pub fn from_f32(samples: &[f32], sample_rate: u32) -> Self {
        let pcm: Vec<i16> = samples
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .collect();
        Self::new(pcm, sample_rate)
    }

    /// Get the duration of this chunk in milliseconds.
    pub fn duration_ms(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 * 1000.0 / self.sample_rate as f32
    }

    /// Get the number of samples in this chunk.
    pub fn num_samples(&self) -> usize {
        self.samples.len()
    }

    /// Samples as 16-bit little-endian bytes.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.samples.len() * 2);
        for &sample in self.samples.iter() {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }
}

/// A synthesis request as received from a client.
///
/// Every field is optional on the wire; absent fields take the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisRequest {
    /// Text to synthesize.
    pub text: Option<String>,
    /// Language of `text`.
    pub text_lang: Option<String>,
    /// Reference audio path.
    pub ref_audio_path: Option<String>,
    /// Transcript of the reference audio.
    pub prompt_text: String,
    /// Language of `prompt_text`.
    pub prompt_lang: Option<String>,
    /// Named speaker; overrides the reference fields when set.
    pub speaker: Option<String>,
    pub top_k: u32,
    pub top_p: f32,
    pub temperature: f32,
    /// Registered text segmentation method name.
    pub text_split_method: String,
    pub batch_size: u32,
    pub batch_threshold: f32,
    pub split_bucket: bool,
    pub speed_factor: f32,
    pub fragment_interval: f32,
    /// Random seed, `-1` for random.
    pub seed: i64,
    /// Output container name.
    pub media_type: String,
    /// Stream chunks as they are produced.
    pub streaming_mode: bool,
    pub parallel_infer: bool,
    pub repetition_penalty: f32,
    /// Model configuration path; the configured default when absent.
    pub tts_infer_yaml_path: Option<String>,
}

impl Default for SynthesisRequest {
    fn default() -> Self {
        Self {
            text: None,
            text_lang: None,
            ref_audio_path: None,
            prompt_text: String::new(),
            prompt_lang: None,
            speaker: None,
            top_k: 5,
            top_p: 1.0,
            temperature: 1.0,
            text_split_method: "cut5".to_string(),
            batch_size: 1,
            batch_threshold: 0.75,
            split_bucket: true,
            speed_factor: 1.0,
            fragment_interval: 0.3,
            seed: -1,
            media_type: "wav".to_string(),
            streaming_mode: false,
            parallel_infer: true,
            repetition_penalty: 1.35,
            tts_infer_yaml_path: None,
        }
    }
}

impl SynthesisRequest {
    /// Create a new request with default settings.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Set the text language.
    pub fn with_text_lang(mut self, lang: impl Into<String>) -> Self {
        self.text_lang = Some(lang.into());
        self
    }

    /// Set the reference audio and its prompt.
    pub fn with_reference(
        mut self,
        ref_audio_path: impl Into<String>,
        prompt_text: impl Into<String>,
        prompt_lang: impl Into<String>,
    ) -> Self {
        self.ref_audio_path = Some(ref_audio_path.into());
        self.prompt_text = prompt_text.into();
        self.prompt_lang = Some(prompt_lang.into());
        self
    }

    /// Use a named speaker profile.
    pub fn with_speaker(mut self, speaker: impl Into<String>) -> Self {
        self.speaker = Some(speaker.into());
        self
    }

    /// Set the output container.
    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = media_type.into();
        self
    }

    /// Enable or disable streaming.
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming_mode = streaming;
        self
    }

    /// Set the text segmentation method.
    pub fn with_split_method(mut self, method: impl Into<String>) -> Self {
        self.text_split_method = method.into();
        self
    }

    /// Set the model configuration path.
    pub fn with_config_path(mut self, path: impl Into<String>) -> Self {
        self.tts_infer_yaml_path = Some(path.into());
        self
    }

    /// Lower-case both language fields.
    pub fn normalize_langs(&mut self) {
        if let Some(lang) = self.text_lang.as_mut() {
            *lang = lang.to_lowercase();
        }
        if let Some(lang) = self.prompt_lang.as_mut() {
            *lang = lang.to_lowercase();
        }
    }
}

/// Fully-resolved input handed to the inference engine.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    pub text: String,
    pub text_lang: String,
    pub ref_audio_path: PathBuf,
    pub prompt_text: String,
    pub prompt_lang: String,
    pub top_k: u32,
    pub top_p: f32,
    pub temperature: f32,
    pub text_split_method: String,
    pub batch_size: u32,
    pub batch_threshold: f32,
    pub split_bucket: bool,
    pub speed_factor: f32,
    pub fragment_interval: f32,
    pub seed: i64,
    pub parallel_infer: bool,
    pub repetition_penalty: f32,
    /// Yield one chunk per text fragment instead of a single joined chunk.
    pub return_fragment: bool,
}

impl InferenceRequest {
    /// Build from a request whose required fields are present.
    pub fn from_request(req: &SynthesisRequest) -> TtsResult<Self> {
        fn required(field: &Option<String>, name: &str) -> TtsResult<String> {
            field
                .clone()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| TtsError::invalid_input(format!("{name} is required")))
        }

        Ok(Self {
            text: required(&req.text, "text")?,
            text_lang: required(&req.text_lang, "text_lang")?,
            ref_audio_path: PathBuf::from(required(&req.ref_audio_path, "ref_audio_path")?),
            prompt_text: req.prompt_text.clone(),
            prompt_lang: required(&req.prompt_lang, "prompt_lang")?,
            top_k: req.top_k,
            top_p: req.top_p,
            temperature: req.temperature,
            text_split_method: req.text_split_method.clone(),
            batch_size: req.batch_size,
            batch_threshold: req.batch_threshold,
            split_bucket: req.split_bucket,
            speed_factor: req.speed_factor,
            fragment_interval: req.fragment_interval,
            seed: req.seed,
            parallel_infer: req.parallel_infer,
            repetition_penalty: req.repetition_penalty,
            return_fragment: req.streaming_mode,
        })
    }
}

/// A named reference voice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakerProfile {
    /// Unique speaker name.
    pub name: String,
    /// Transcript of the reference audio.
    #[serde(default)]
    pub prompt_text: Option<String>,
    /// Language of the transcript.
    #[serde(default)]
    pub prompt_lang: Option<String>,
}

impl SpeakerProfile {
    /// Create an empty profile.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt_text: None,
            prompt_lang: None,
        }
    }
}
