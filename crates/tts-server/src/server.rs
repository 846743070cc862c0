//! HTTP server: router, shared state, and lifecycle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use runtime::{ControlCommand, TtsService};
use tts_core::{ServerConfig, TtsError, TtsResult};

use crate::routes;

/// Shared server state.
pub struct AppState {
    pub service: Arc<TtsService>,
    /// Scrape handle; `None` when metrics are disabled.
    pub metrics: Option<PrometheusHandle>,
    pub config: ServerConfig,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        service: Arc<TtsService>,
        metrics: Option<PrometheusHandle>,
        config: ServerConfig,
    ) -> Self {
        Self {
            service,
            metrics,
            config,
            start_time: Instant::now(),
        }
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_body_size;
    Router::new()
        .route("/tts", get(routes::tts_get).post(routes::tts_post))
        .route("/control", get(routes::control).post(routes::control))
        .route("/set_gpt_weights", get(routes::set_gpt_weights))
        .route("/set_sovits_weights", get(routes::set_sovits_weights))
        .route("/set_refer_audio", get(routes::set_refer_audio))
        .route(
            "/speakers",
            get(routes::list_speakers).post(routes::upload_speaker),
        )
        .route("/health", get(routes::health))
        .route("/healthz", get(routes::health))
        .route("/ready", get(routes::ready))
        .route("/info", get(routes::info))
        .route("/metrics", get(routes::metrics))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// The TTS HTTP server.
pub struct TtsServer {
    state: Arc<AppState>,
}

impl TtsServer {
    pub fn new(state: AppState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    /// Serve until a signal arrives or a control command is issued.
    ///
    /// # Returns
    /// The control command that stopped the server, if any.
    pub async fn run(self) -> TtsResult<Option<ControlCommand>> {
        let config = &self.state.config;
        let addr = format!("{}:{}", config.host, config.port);
        let timeout = Duration::from_secs(config.shutdown_timeout_secs);
        let control = self.state.service.control().clone();

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| TtsError::config(format!("failed to bind {addr}: {e}")))?;
        info!(addr = %addr, "HTTP server listening");

        let app = router(Arc::clone(&self.state));
        let mut commands = control.subscribe();
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_signal() => info!("shutdown signal received"),
                _ = commands.wait_for(Option::is_some) => info!("control command received"),
            }
        });

        // Graceful shutdown waits for open streams; bound that wait.
        let mut handle = tokio::spawn(async move { server.await });
        let mut stopping = control.subscribe();
        tokio::select! {
            result = &mut handle => {
                result
                    .map_err(|e| TtsError::internal(format!("server task failed: {e}")))?
                    .map_err(TtsError::from)?;
            }
            _ = async {
                tokio::select! {
                    _ = shutdown_signal() => {}
                    _ = stopping.wait_for(Option::is_some) => {}
                }
                tokio::time::sleep(timeout).await;
            } => {
                warn!(timeout_secs = timeout.as_secs(), "shutdown timeout, aborting open connections");
                handle.abort();
            }
        }

        info!("HTTP server stopped");
        Ok(control.pending())
    }
}

/// Wait for SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
