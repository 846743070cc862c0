//! # tts-core
//!
//! Core types, traits, and error definitions for the TTS serving front end.
//!
//! This crate provides the foundational abstractions used across all other crates
//! in the workspace, including:
//!
//! - Request, chunk, and speaker types (`SynthesisRequest`, `AudioChunk`, etc.)
//! - The inference engine seam (`TtsEngine`, `TtsModel`)
//! - Unified error handling via `TtsError`
//! - Configuration structures

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{
    LoggingConfig, ModelConfig, RuntimeConfig, ServerConfig, StreamDemotePolicy,
    DEFAULT_MODEL_CONFIG,
};
pub use error::{ErrorKind, TtsError, TtsResult};
pub use traits::{ChunkIter, TtsEngine, TtsModel};
pub use types::{
    AudioChunk, ComputeDevice, InferenceRequest, MediaType, ModelConfigId, Precision, Residency,
    SpeakerProfile, SynthesisRequest,
};
