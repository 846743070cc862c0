//! Request validation against a model's capabilities.

use std::fmt;

use text_splitter::SplitterRegistry;
use tts_core::{MediaType, ModelConfig, SynthesisRequest, TtsError};

/// Why a request was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    MissingRefAudioPath,
    MissingText,
    MissingTextLang,
    UnsupportedTextLang,
    MissingPromptLang,
    UnsupportedPromptLang,
    UnsupportedMediaType,
    OggRequiresStreaming,
    UnknownSplitMethod(String),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::MissingRefAudioPath => f.write_str("ref_audio_path is required"),
            Rejection::MissingText => f.write_str("text is required"),
            Rejection::MissingTextLang => f.write_str("text_lang is required"),
            Rejection::UnsupportedTextLang => f.write_str("text_lang is not supported"),
            Rejection::MissingPromptLang => f.write_str("prompt_lang is required"),
            Rejection::UnsupportedPromptLang => f.write_str("prompt_lang is not supported"),
            Rejection::UnsupportedMediaType => f.write_str("media_type is not supported"),
            Rejection::OggRequiresStreaming => {
                f.write_str("ogg format is not supported in non-streaming mode")
            }
            Rejection::UnknownSplitMethod(method) => {
                write!(f, "text_split_method:{method} is not supported")
            }
        }
    }
}

impl std::error::Error for Rejection {}

impl From<Rejection> for TtsError {
    fn from(rejection: Rejection) -> Self {
        TtsError::invalid_input(rejection.to_string())
    }
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|v| !v.is_empty())
}

/// Check a request before any model work is done.
///
/// Checks run in a fixed order and stop at the first failure.
///
/// # Returns
/// The parsed output container on success.
pub fn validate(
    req: &SynthesisRequest,
    config: &ModelConfig,
    splitter: &SplitterRegistry,
) -> Result<MediaType, Rejection> {
    if present(&req.ref_audio_path).is_none() {
        return Err(Rejection::MissingRefAudioPath);
    }
    if present(&req.text).is_none() {
        return Err(Rejection::MissingText);
    }

    let text_lang = present(&req.text_lang).ok_or(Rejection::MissingTextLang)?;
    if !config.supports_language(text_lang) {
        return Err(Rejection::UnsupportedTextLang);
    }

    let prompt_lang = present(&req.prompt_lang).ok_or(Rejection::MissingPromptLang)?;
    if !config.supports_language(prompt_lang) {
        return Err(Rejection::UnsupportedPromptLang);
    }

    let media_type: MediaType = req
        .media_type
        .parse()
        .map_err(|_| Rejection::UnsupportedMediaType)?;
    if media_type == MediaType::Ogg && !req.streaming_mode {
        return Err(Rejection::OggRequiresStreaming);
    }

    if !splitter.contains(&req.text_split_method) {
        return Err(Rejection::UnknownSplitMethod(req.text_split_method.clone()));
    }

    Ok(media_type)
}
