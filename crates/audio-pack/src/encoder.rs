//! External encoder process for compressed containers.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};
use tts_core::{TtsError, TtsResult};

/// Compressed container produced by the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// AAC, ADTS framed.
    Aac,
    /// Vorbis in an Ogg container.
    OggVorbis,
}

impl Codec {
    fn output_args(&self) -> &'static [&'static str] {
        match self {
            Codec::Aac => &["-c:a", "aac", "-b:a", "192k", "-vn", "-f", "adts"],
            Codec::OggVorbis => &["-c:a", "libvorbis", "-vn", "-f", "ogg"],
        }
    }
}

/// Transcodes 16-bit mono PCM by piping it through `ffmpeg`.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    binary: PathBuf,
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegEncoder {
    /// Create an encoder using the given binary.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Path of the encoder binary.
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Encode one self-contained segment.
    ///
    /// # Arguments
    /// * `pcm` - Little-endian 16-bit mono samples
    /// * `sample_rate` - Sample rate of `pcm`
    /// * `codec` - Target container
    pub async fn encode(&self, pcm: Vec<u8>, sample_rate: u32, codec: Codec) -> TtsResult<Vec<u8>> {
        let rate = sample_rate.to_string();
        let mut child = Command::new(&self.binary)
            .args(["-hide_banner", "-loglevel", "error"])
            .args(["-f", "s16le", "-ar", rate.as_str(), "-ac", "1", "-i", "pipe:0"])
            .args(codec.output_args())
            .arg("pipe:1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                TtsError::encoder(format!("failed to run {}: {e}", self.binary.display()))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| TtsError::encoder("encoder stdin unavailable"))?;

        // Feed stdin concurrently so a full stdout pipe cannot deadlock us.
        let input_len = pcm.len();
        let feeder = tokio::spawn(async move {
            let result = stdin.write_all(&pcm).await;
            drop(stdin);
            result
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| TtsError::encoder(format!("encoder wait failed: {e}")))?;

        match feeder.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "encoder closed stdin early"),
            Err(e) => return Err(TtsError::internal(format!("encoder feeder panicked: {e}"))),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TtsError::encoder(format!(
                "encoder exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        debug!(
            codec = ?codec,
            input_bytes = input_len,
            output_bytes = output.stdout.len(),
            "segment encoded"
        );
        Ok(output.stdout)
    }
}
