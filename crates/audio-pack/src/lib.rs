//! # audio-pack
//!
//! Container packaging for synthesized PCM.
//!
//! This crate provides:
//! - WAV encoding and decoding (via `hound`)
//! - Headerless raw PCM
//! - Ogg Vorbis and ADTS AAC through an external `ffmpeg` process
//! - Buffered (one complete file) and streaming (per-chunk) packaging

pub mod encoder;
pub mod packager;
pub mod wav;

pub use encoder::{Codec, FfmpegEncoder};
pub use packager::{AudioPackager, StreamPacker};
