//! HTTP handlers.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Multipart, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use runtime::{CachedModel, ControlCommand, SpeakerAudio, SpeakerUpdate, SynthesisOutput};
use tts_core::{SpeakerProfile, SynthesisRequest};

use crate::error::ApiError;
use crate::server::AppState;

type SharedState = State<Arc<AppState>>;

fn success() -> Json<serde_json::Value> {
    Json(json!({ "message": "success" }))
}

/// `GET /tts`: parameters in the query string.
pub async fn tts_get(
    State(state): SharedState,
    query: Result<Query<SynthesisRequest>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(request) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    synthesize(&state, request).await
}

/// `POST /tts`: parameters in a JSON body.
pub async fn tts_post(
    State(state): SharedState,
    body: Result<Json<SynthesisRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    synthesize(&state, request).await
}

async fn synthesize(state: &AppState, request: SynthesisRequest) -> Result<Response, ApiError> {
    let output = state.service.synthesize(request).await?;
    let content_type = output.content_type();

    let response = match output {
        SynthesisOutput::Buffered { audio, .. } => {
            ([(header::CONTENT_TYPE, content_type)], audio).into_response()
        }
        SynthesisOutput::Streaming { stream, .. } => (
            [(header::CONTENT_TYPE, content_type)],
            Body::from_stream(stream),
        )
            .into_response(),
    };
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct ControlParams {
    command: Option<String>,
}

/// `GET|POST /control?command=restart|exit`
///
/// The server shuts down gracefully once the command is recorded.
pub async fn control(
    State(state): SharedState,
    Query(params): Query<ControlParams>,
) -> Result<StatusCode, ApiError> {
    let command = params
        .command
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::bad_request("command is required"))?;
    let command: ControlCommand = command.parse()?;
    state.service.control().request(command);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct WeightParams {
    weights_path: Option<String>,
    tts_infer_yaml_path: Option<String>,
}

/// `GET /set_gpt_weights`
pub async fn set_gpt_weights(
    State(state): SharedState,
    Query(params): Query<WeightParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let weights = params
        .weights_path
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::bad_request("gpt weight path is required"))?;
    state
        .service
        .set_gpt_weights(params.tts_infer_yaml_path.as_deref(), &weights)
        .await
        .map_err(|e| ApiError::from_tts(e, "change gpt weight failed"))?;
    Ok(success())
}

/// `GET /set_sovits_weights`
pub async fn set_sovits_weights(
    State(state): SharedState,
    Query(params): Query<WeightParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let weights = params
        .weights_path
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::bad_request("sovits weight path is required"))?;
    state
        .service
        .set_sovits_weights(params.tts_infer_yaml_path.as_deref(), &weights)
        .await
        .map_err(|e| ApiError::from_tts(e, "change sovits weight failed"))?;
    Ok(success())
}

#[derive(Debug, Deserialize)]
pub struct ReferParams {
    refer_audio_path: Option<String>,
    tts_infer_yaml_path: Option<String>,
}

/// `GET /set_refer_audio`
pub async fn set_refer_audio(
    State(state): SharedState,
    Query(params): Query<ReferParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let audio = params
        .refer_audio_path
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::bad_request("refer audio path is required"))?;
    state
        .service
        .set_refer_audio(params.tts_infer_yaml_path.as_deref(), &audio)
        .await
        .map_err(|e| ApiError::from_tts(e, "set refer audio failed"))?;
    Ok(success())
}

/// `POST /speakers`: multipart form with `name`, optional `prompt_lang`,
/// optional `prompt_text`, and a `file` holding WAV audio.
pub async fn upload_speaker(
    State(state): SharedState,
    mut form: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut name = None;
    let mut update = SpeakerUpdate::default();

    while let Some(field) = form
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "name" => name = Some(field_text(field).await?),
            "prompt_lang" => update.prompt_lang = Some(field_text(field).await?),
            "prompt_text" => update.prompt_text = Some(field_text(field).await?),
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(e.body_text()))?;
                update.audio = Some(SpeakerAudio {
                    file_name,
                    bytes: bytes.to_vec(),
                });
            }
            other => debug!(field = other, "ignoring form field"),
        }
    }

    let name = name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ApiError::bad_request("name is required"))?;

    let service = Arc::clone(&state.service);
    let speaker = name.clone();
    tokio::task::spawn_blocking(move || service.speakers().update(&speaker, update))
        .await
        .map_err(|e| ApiError::from(tts_core::TtsError::internal(e.to_string())))??;

    info!(speaker = %name, "speaker uploaded");
    Ok(Json(json!({ "message": format!("speaker {name} updated") })))
}

async fn field_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))
}

#[derive(Debug, Serialize)]
pub struct SpeakersResponse {
    speakers: std::collections::BTreeMap<String, SpeakerProfile>,
}

/// `GET /speakers`
pub async fn list_speakers(State(state): SharedState) -> Result<Json<SpeakersResponse>, ApiError> {
    let service = Arc::clone(&state.service);
    let speakers = tokio::task::spawn_blocking(move || service.speakers().list())
        .await
        .map_err(|e| ApiError::from(tts_core::TtsError::internal(e.to_string())))??;
    Ok(Json(SpeakersResponse { speakers }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
}

/// `GET /health`, `GET /healthz`
pub async fn health(State(state): SharedState) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// `GET /ready`: not ready once a restart or exit is pending.
pub async fn ready(State(state): SharedState) -> StatusCode {
    if state.service.control().pending().is_some() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

#[derive(Serialize)]
struct InfoResponse {
    name: &'static str,
    version: &'static str,
    addr: String,
    default_model_config: String,
    cache_capacity: usize,
    models: Vec<CachedModel>,
}

/// `GET /info`
pub async fn info(State(state): SharedState) -> impl IntoResponse {
    let runtime = state.service.config();
    Json(InfoResponse {
        name: "tts-server",
        version: env!("CARGO_PKG_VERSION"),
        addr: format!("{}:{}", state.config.host, state.config.port),
        default_model_config: runtime.default_model_config.display().to_string(),
        cache_capacity: state.service.cache().capacity(),
        models: state.service.cached_models(),
    })
}

/// `GET /metrics`: Prometheus text format.
pub async fn metrics(State(state): SharedState) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
