//! # runtime
//!
//! Serving orchestration for the TTS front end.
//!
//! This crate provides:
//! - Request validation
//! - An LRU cache of model instances with single-flight construction
//! - Device residency management (promote before inference, demote after)
//! - A file-backed speaker registry
//! - The request orchestrator tying them together
//! - Structured logging and metrics

pub mod cache;
pub mod control;
pub mod device;
pub mod instance;
pub mod logging;
pub mod metrics;
pub mod mock;
pub mod service;
pub mod speakers;
pub mod validate;
pub mod warm;

pub use cache::ModelCache;
pub use control::{ControlCommand, ControlHandle};
pub use device::{DeviceManager, Lease};
pub use instance::{DeviceState, ModelInstance};
pub use metrics::TtsMetrics;
pub use mock::{MockEngine, MockModelProbe, MOCK_SAMPLE_RATE};
pub use service::{AudioStream, CachedModel, Stage, SynthesisOutput, TtsService};
pub use speakers::{SpeakerAudio, SpeakerRegistry, SpeakerUpdate};
pub use validate::{validate, Rejection};
pub use warm::preload_models;
