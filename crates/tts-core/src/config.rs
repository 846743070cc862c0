//! Configuration structures for the serving front end.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{TtsError, TtsResult};
use crate::types::{ComputeDevice, ModelConfigId, Precision};

/// Default model configuration path.
pub const DEFAULT_MODEL_CONFIG: &str = "GPT_SoVITS/configs/tts_infer.yaml";

/// Languages accepted by v1 models.
pub const V1_LANGUAGES: &[&str] = &["auto", "en", "zh", "ja", "all_zh", "all_ja"];

/// Languages accepted by v2 models.
pub const V2_LANGUAGES: &[&str] = &[
    "auto", "auto_yue", "en", "zh", "ja", "yue", "ko", "all_zh", "all_ja", "all_yue", "all_ko",
];

/// One section of the inference YAML file.
#[derive(Debug, Clone, Default, Deserialize)]
struct InferSection {
    device: Option<String>,
    is_half: Option<bool>,
    version: Option<String>,
    t2s_weights_path: Option<PathBuf>,
    vits_weights_path: Option<PathBuf>,
    languages: Option<Vec<String>>,
}

/// Top-level shape of the inference YAML file.
#[derive(Debug, Default, Deserialize)]
struct InferFile {
    custom: Option<InferSection>,
    default_v2: Option<InferSection>,
    default: Option<InferSection>,
}

/// The parts of a model configuration the serving layer reads.
///
/// The remaining keys of the file belong to the inference engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelConfig {
    /// Identity of the file this was read from.
    pub id: ModelConfigId,
    /// Device the model serves on.
    pub device: ComputeDevice,
    /// Serve at reduced precision.
    pub is_half: bool,
    /// Model generation (`v1`, `v2`, ...).
    pub version: String,
    /// Supported languages, lowercase.
    pub languages: Vec<String>,
    /// Text-to-semantic weights.
    pub t2s_weights_path: Option<PathBuf>,
    /// Vocoder weights.
    pub vits_weights_path: Option<PathBuf>,
}

impl ModelConfig {
    /// Read a configuration file.
    pub fn load(id: &ModelConfigId) -> TtsResult<Self> {
        let text = std::fs::read_to_string(id.path()).map_err(|source| TtsError::ConfigLoad {
            path: id.path().to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(id.clone(), &text)
    }

    /// Parse configuration text.
    ///
    /// The `custom` section wins; `default_v2` and `default` are fallbacks.
    pub fn from_yaml_str(id: ModelConfigId, text: &str) -> TtsResult<Self> {
        let file: InferFile = serde_yaml::from_str(text)
            .map_err(|e| TtsError::serialization(format!("invalid model config {id}: {e}")))?;
        let section = file
            .custom
            .or(file.default_v2)
            .or(file.default)
            .unwrap_or_default();

        let device = match section.device.as_deref() {
            Some(device) => device.parse()?,
            None => ComputeDevice::Cpu,
        };
        let version = section.version.unwrap_or_else(|| "v2".to_string());
        let languages = match section.languages {
            Some(langs) => langs.into_iter().map(|l| l.to_lowercase()).collect(),
            None => default_languages(&version),
        };

        Ok(Self {
            id,
            device,
            is_half: section.is_half.unwrap_or(false),
            version,
            languages,
            t2s_weights_path: section.t2s_weights_path,
            vits_weights_path: section.vits_weights_path,
        })
    }

    /// Whether `lang` is supported, ignoring case.
    pub fn supports_language(&self, lang: &str) -> bool {
        let lang = lang.to_lowercase();
        self.languages.iter().any(|l| *l == lang)
    }

    /// Precision the model serves at.
    pub fn serving_precision(&self) -> Precision {
        Precision::from_half(self.is_half)
    }
}

fn default_languages(version: &str) -> Vec<String> {
    let langs = if version == "v1" {
        V1_LANGUAGES
    } else {
        V2_LANGUAGES
    };
    langs.iter().map(|l| l.to_string()).collect()
}

/// What happens to an instance's residency when a stream finishes normally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamDemotePolicy {
    /// Move to host once the last chunk is sent.
    #[default]
    Demote,
    /// Stay on the accelerator until another request needs it.
    KeepHot,
}

/// Runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Model configuration used when a request names none.
    #[serde(default = "default_model_config")]
    pub default_model_config: PathBuf,
    /// Maximum cached model instances.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Residency after a completed stream.
    #[serde(default)]
    pub stream_demote: StreamDemotePolicy,
    /// Precision of instances parked on the host.
    #[serde(default = "default_host_precision")]
    pub host_precision: Precision,
    /// Syntheses allowed to run at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Chunks buffered between inference and packaging when streaming.
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
    /// Speaker profile directory.
    #[serde(default = "default_speaker_dir")]
    pub speaker_dir: PathBuf,
    /// External encoder binary.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
}

fn default_model_config() -> PathBuf {
    PathBuf::from(DEFAULT_MODEL_CONFIG)
}

fn default_cache_capacity() -> usize {
    10
}

fn default_host_precision() -> Precision {
    Precision::Reduced
}

fn default_max_concurrent() -> usize {
    4
}

fn default_stream_buffer() -> usize {
    8
}

fn default_speaker_dir() -> PathBuf {
    PathBuf::from("reference")
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_model_config: default_model_config(),
            cache_capacity: default_cache_capacity(),
            stream_demote: StreamDemotePolicy::default(),
            host_precision: default_host_precision(),
            max_concurrent: default_max_concurrent(),
            stream_buffer: default_stream_buffer(),
            speaker_dir: default_speaker_dir(),
            ffmpeg_path: default_ffmpeg_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format (json or text).
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Server configuration (for tts-server).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address.
    #[serde(default = "default_server_host")]
    pub host: String,
    /// Server port.
    #[serde(default = "default_server_port")]
    pub port: u16,
    /// Request body size limit in bytes.
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// Model configurations loaded at startup.
    #[serde(default)]
    pub preload: Vec<PathBuf>,
    /// Install the Prometheus recorder.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    9880
}

fn default_max_body_size() -> usize {
    50 * 1024 * 1024
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            max_body_size: default_max_body_size(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            preload: Vec::new(),
            metrics_enabled: default_metrics_enabled(),
            runtime: RuntimeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read a YAML (or JSON) server configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> TtsResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&text)
            .map_err(|e| TtsError::config(format!("invalid server config {}: {e}", path.display())))
    }
}
