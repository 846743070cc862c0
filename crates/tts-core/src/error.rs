//! Unified error types for the serving front end.

use std::path::PathBuf;

/// Main error type for serving operations.
#[derive(Debug, thiserror::Error)]
pub enum TtsError {
    /// Request field missing or not acceptable for the target model.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Named resource (speaker, audio backing file) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Model configuration file could not be read.
    #[error("model config load failed for {path}: {source}")]
    ConfigLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Model construction or inference error.
    #[error("inference error: {0}")]
    Inference(String),

    /// Residency or precision change failed.
    #[error("device error: {0}")]
    Device(String),

    /// External audio encoder failed.
    #[error("encoder error: {0}")]
    Encoder(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen in normal operation).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results with TtsError.
pub type TtsResult<T> = Result<T, TtsError>;

/// Coarse failure category used for status mapping and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or invalid request fields.
    ClientInput,
    /// Unknown speaker or missing backing file.
    NotFound,
    /// Model, device, encoder, or configuration failure during a request.
    Inference,
    /// Bug or broken invariant.
    Internal,
}

impl ErrorKind {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ClientInput => "client_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Inference => "inference",
            ErrorKind::Internal => "internal",
        }
    }
}

impl TtsError {
    /// Create an invalid input error with message.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a not-found error with message.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an inference error with message.
    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a device error with message.
    pub fn device(msg: impl Into<String>) -> Self {
        Self::Device(msg.into())
    }

    /// Create an encoder error with message.
    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::Encoder(msg.into())
    }

    /// Create a config error with message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a serialization error with message.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create an internal error with message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Failure category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::ClientInput,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::ConfigLoad { .. }
            | Self::Inference(_)
            | Self::Device(_)
            | Self::Encoder(_)
            | Self::Config(_)
            | Self::Io(_)
            | Self::Serialization(_) => ErrorKind::Inference,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The bare reason without the category prefix.
    ///
    /// Client-facing payloads carry this text verbatim.
    pub fn reason(&self) -> String {
        match self {
            Self::InvalidInput(msg)
            | Self::NotFound(msg)
            | Self::Inference(msg)
            | Self::Device(msg)
            | Self::Encoder(msg)
            | Self::Config(msg)
            | Self::Serialization(msg)
            | Self::Internal(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TtsError::invalid_input("text is required");
        assert_eq!(err.to_string(), "invalid input: text is required");

        let err = TtsError::ConfigLoad {
            path: PathBuf::from("missing.yaml"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        assert_eq!(
            err.to_string(),
            "model config load failed for missing.yaml: no such file"
        );
    }

    #[test]
    fn test_error_constructors() {
        let err = TtsError::not_found("speaker bob not found");
        assert!(matches!(err, TtsError::NotFound(_)));

        let err = TtsError::encoder("ffmpeg exited with 1");
        assert!(matches!(err, TtsError::Encoder(_)));
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(TtsError::invalid_input("x").kind(), ErrorKind::ClientInput);
        assert_eq!(TtsError::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(TtsError::device("x").kind(), ErrorKind::Inference);
        assert_eq!(TtsError::encoder("x").kind(), ErrorKind::Inference);
        assert_eq!(TtsError::internal("x").kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_reason_strips_prefix() {
        let err = TtsError::invalid_input("media_type is not supported");
        assert_eq!(err.reason(), "media_type is not supported");
    }
}
