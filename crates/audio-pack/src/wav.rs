//! WAV encoding utilities.

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::io::{self, Cursor};
use tts_core::{TtsError, TtsResult};

/// Size of a canonical PCM WAV header.
pub const WAV_HEADER_LEN: usize = 44;

/// Length field value for a body of unknown size.
const UNKNOWN_LEN: u32 = u32::MAX;

fn mono16(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

fn io_err(e: hound::Error) -> TtsError {
    TtsError::Io(io::Error::other(e.to_string()))
}

/// Encode samples as a complete in-memory WAV file.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> TtsResult<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::with_capacity(WAV_HEADER_LEN + samples.len() * 2));
    {
        let mut writer = WavWriter::new(&mut cursor, mono16(sample_rate)).map_err(io_err)?;
        for &sample in samples {
            writer.write_sample(sample).map_err(io_err)?;
        }
        writer.finalize().map_err(io_err)?;
    }
    Ok(cursor.into_inner())
}

/// Decode a 16-bit WAV file.
///
/// # Returns
/// Sample rate and interleaved samples.
pub fn decode_wav(bytes: &[u8]) -> TtsResult<(u32, Vec<i16>)> {
    let reader = WavReader::new(Cursor::new(bytes))
        .map_err(|e| TtsError::invalid_input(format!("invalid wav data: {e}")))?;
    let spec = reader.spec();
    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(TtsError::invalid_input(format!(
            "unsupported wav encoding: {:?} {} bit",
            spec.sample_format, spec.bits_per_sample
        )));
    }
    let samples = reader
        .into_samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TtsError::invalid_input(format!("invalid wav data: {e}")))?;
    Ok((spec.sample_rate, samples))
}

/// Whether `bytes` start with a readable WAV header.
pub fn is_wav(bytes: &[u8]) -> bool {
    WavReader::new(Cursor::new(bytes)).is_ok()
}

/// Header for a streamed WAV body of unknown length.
///
/// Both RIFF and data sizes carry the maximum value; players read until EOF.
pub fn streaming_header(sample_rate: u32) -> Vec<u8> {
    let channels: u16 = 1;
    let bits: u16 = 16;
    let block_align = channels * bits / 8;
    let byte_rate = sample_rate * u32::from(block_align);

    let mut header = Vec::with_capacity(WAV_HEADER_LEN);
    header.extend_from_slice(b"RIFF");
    header.extend_from_slice(&UNKNOWN_LEN.to_le_bytes());
    header.extend_from_slice(b"WAVE");
    header.extend_from_slice(b"fmt ");
    header.extend_from_slice(&16u32.to_le_bytes());
    header.extend_from_slice(&1u16.to_le_bytes());
    header.extend_from_slice(&channels.to_le_bytes());
    header.extend_from_slice(&sample_rate.to_le_bytes());
    header.extend_from_slice(&byte_rate.to_le_bytes());
    header.extend_from_slice(&block_align.to_le_bytes());
    header.extend_from_slice(&bits.to_le_bytes());
    header.extend_from_slice(b"data");
    header.extend_from_slice(&UNKNOWN_LEN.to_le_bytes());
    header
}
