//! JSON error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tts_core::{ErrorKind, TtsError};

/// Error returned by an HTTP handler.
#[derive(Debug)]
pub enum ApiError {
    /// The client sent something unusable. Body: `{"message": ...}`.
    BadRequest(String),
    /// The operation itself failed. Body: `{"message": ..., "Exception": ...}`.
    Failed {
        status: StatusCode,
        message: &'static str,
        exception: String,
    },
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Map a service error, using `message` as the summary for failures.
    ///
    /// Client mistakes carry only their reason; anything else is reported
    /// under `message` with the error text attached.
    pub fn from_tts(err: TtsError, message: &'static str) -> Self {
        match err.kind() {
            ErrorKind::ClientInput | ErrorKind::NotFound => Self::BadRequest(err.reason()),
            ErrorKind::Inference => Self::Failed {
                status: StatusCode::BAD_REQUEST,
                message,
                exception: err.to_string(),
            },
            ErrorKind::Internal => Self::Failed {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message,
                exception: err.to_string(),
            },
        }
    }
}

impl From<TtsError> for ApiError {
    fn from(err: TtsError) -> Self {
        Self::from_tts(err, "tts failed")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "message": message }))).into_response()
            }
            ApiError::Failed {
                status,
                message,
                exception,
            } => (
                status,
                Json(json!({ "message": message, "Exception": exception })),
            )
                .into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_are_bare() {
        let err = ApiError::from(TtsError::invalid_input("text is required"));
        assert!(matches!(err, ApiError::BadRequest(ref m) if m == "text is required"));

        let err = ApiError::from(TtsError::not_found("speaker x not found"));
        assert!(matches!(err, ApiError::BadRequest(ref m) if m == "speaker x not found"));
    }

    #[test]
    fn test_failures_carry_exception() {
        let err = ApiError::from_tts(TtsError::inference("boom"), "change gpt weight failed");
        let ApiError::Failed {
            status,
            message,
            exception,
        } = err
        else {
            panic!("expected failure");
        };
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(message, "change gpt weight failed");
        assert!(exception.contains("boom"));
    }

    #[test]
    fn test_internal_is_server_error() {
        let response = ApiError::from(TtsError::internal("oops")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
