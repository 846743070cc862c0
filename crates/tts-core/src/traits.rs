//! Trait definitions for the external inference engine.

use std::path::Path;

use crate::config::ModelConfig;
use crate::error::TtsResult;
use crate::types::{AudioChunk, ComputeDevice, InferenceRequest, Precision};

/// Lazy sequence of synthesized chunks.
pub type ChunkIter = Box<dyn Iterator<Item = TtsResult<AudioChunk>> + Send>;

/// Factory for model instances.
///
/// Construction is expensive; callers go through the model cache.
pub trait TtsEngine: Send + Sync {
    /// Construct a model from a configuration.
    ///
    /// # Arguments
    /// * `config` - Configuration the instance is bound to for its lifetime
    ///
    /// # Returns
    /// A model resident on `config.device` at the configured precision.
    fn load(&self, config: &ModelConfig) -> TtsResult<Box<dyn TtsModel>>;
}

/// A loaded text-to-semantic model plus vocoder.
pub trait TtsModel: Send {
    /// Move all weights to `device`.
    fn set_device(&mut self, device: ComputeDevice) -> TtsResult<()>;

    /// Convert all weights to `precision`.
    fn set_precision(&mut self, precision: Precision) -> TtsResult<()>;

    /// Start synthesis.
    ///
    /// # Arguments
    /// * `request` - Validated request
    ///
    /// # Returns
    /// Chunks in playback order. With `return_fragment` unset the iterator
    /// yields the whole utterance as one chunk.
    fn run(&mut self, request: &InferenceRequest) -> TtsResult<ChunkIter>;

    /// Replace the text-to-semantic weights.
    fn load_gpt_weights(&mut self, path: &Path) -> TtsResult<()>;

    /// Replace the vocoder weights.
    fn load_sovits_weights(&mut self, path: &Path) -> TtsResult<()>;

    /// Set the default reference audio.
    fn set_ref_audio(&mut self, path: &Path) -> TtsResult<()>;
}
