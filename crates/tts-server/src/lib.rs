//! # tts-server
//!
//! HTTP front end for text-to-speech synthesis.
//!
//! Provides:
//! - Buffered and streaming synthesis (`/tts`)
//! - Model weight and reference audio swaps
//! - Speaker upload and listing
//! - Process control (restart, exit)
//! - Health, info, and Prometheus metrics endpoints

pub mod error;
pub mod routes;
pub mod server;

pub use error::ApiError;
pub use server::{router, AppState, TtsServer};
