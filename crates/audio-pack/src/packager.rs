//! Buffered and streaming packaging of synthesized chunks.

use bytes::Bytes;
use tracing::debug;
use tts_core::{AudioChunk, MediaType, TtsError, TtsResult};

use crate::encoder::{Codec, FfmpegEncoder};
use crate::wav;

/// Turns PCM chunks into container bytes.
#[derive(Debug, Clone, Default)]
pub struct AudioPackager {
    encoder: FfmpegEncoder,
}

impl AudioPackager {
    /// Create a packager using `encoder` for compressed formats.
    pub fn new(encoder: FfmpegEncoder) -> Self {
        Self { encoder }
    }

    /// The external encoder.
    pub fn encoder(&self) -> &FfmpegEncoder {
        &self.encoder
    }

    /// Package a whole utterance into one complete file.
    ///
    /// All chunks must share a sample rate; they are encoded as one
    /// continuous signal.
    pub async fn pack_buffered(&self, chunks: &[AudioChunk], media_type: MediaType) -> TtsResult<Bytes> {
        let whole = concat(chunks)?;
        let bytes = match media_type {
            MediaType::Wav => wav::encode_wav(&whole.samples, whole.sample_rate)?,
            MediaType::Raw => whole.to_le_bytes(),
            MediaType::Ogg => {
                self.encoder
                    .encode(whole.to_le_bytes(), whole.sample_rate, Codec::OggVorbis)
                    .await?
            }
            MediaType::Aac => {
                self.encoder
                    .encode(whole.to_le_bytes(), whole.sample_rate, Codec::Aac)
                    .await?
            }
        };
        debug!(
            media_type = %media_type,
            chunks = chunks.len(),
            samples = whole.num_samples(),
            bytes = bytes.len(),
            "packaged buffered audio"
        );
        Ok(Bytes::from(bytes))
    }

    /// Start an incremental packaging session.
    pub fn stream(&self, media_type: MediaType) -> StreamPacker {
        StreamPacker {
            media_type,
            encoder: self.encoder.clone(),
            header_sent: false,
            chunks: 0,
        }
    }
}

/// Per-response packaging state for streamed output.
///
/// WAV output gets one header before the first chunk and raw PCM after it.
/// Ogg and AAC chunks are encoded independently; both formats concatenate.
#[derive(Debug)]
pub struct StreamPacker {
    media_type: MediaType,
    encoder: FfmpegEncoder,
    header_sent: bool,
    chunks: usize,
}

impl StreamPacker {
    /// Output container.
    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    /// Chunks packaged so far.
    pub fn chunks_packed(&self) -> usize {
        self.chunks
    }

    /// Package the next chunk.
    pub async fn pack(&mut self, chunk: &AudioChunk) -> TtsResult<Bytes> {
        let bytes = match self.media_type {
            MediaType::Wav if !self.header_sent => {
                let mut out = wav::streaming_header(chunk.sample_rate);
                out.extend_from_slice(&chunk.to_le_bytes());
                self.header_sent = true;
                out
            }
            MediaType::Wav | MediaType::Raw => chunk.to_le_bytes(),
            MediaType::Ogg => {
                self.encoder
                    .encode(chunk.to_le_bytes(), chunk.sample_rate, Codec::OggVorbis)
                    .await?
            }
            MediaType::Aac => {
                self.encoder
                    .encode(chunk.to_le_bytes(), chunk.sample_rate, Codec::Aac)
                    .await?
            }
        };
        self.chunks += 1;
        Ok(Bytes::from(bytes))
    }
}

fn concat(chunks: &[AudioChunk]) -> TtsResult<AudioChunk> {
    let first = chunks
        .first()
        .ok_or_else(|| TtsError::inference("engine produced no audio"))?;
    let total: usize = chunks.iter().map(AudioChunk::num_samples).sum();
    let mut samples = Vec::with_capacity(total);
    for chunk in chunks {
        if chunk.sample_rate != first.sample_rate {
            return Err(TtsError::inference(format!(
                "sample rate changed mid-utterance: {} then {}",
                first.sample_rate, chunk.sample_rate
            )));
        }
        samples.extend_from_slice(&chunk.samples);
    }
    Ok(AudioChunk::new(samples, first.sample_rate))
}
