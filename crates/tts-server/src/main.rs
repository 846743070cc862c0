//! TTS HTTP server.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use runtime::{ControlCommand, MockEngine, TtsMetrics, TtsService};
use text_splitter::SplitterRegistry;
use tts_core::ServerConfig;
use tts_server::{AppState, TtsServer};

/// TTS HTTP server
#[derive(Debug, Parser)]
#[command(name = "tts-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (YAML)
    #[arg(short, long, env = "TTS_SERVER_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(short = 'a', long, env = "TTS_BIND_ADDR")]
    bind_addr: Option<String>,

    /// Port
    #[arg(short, long, env = "TTS_PORT")]
    port: Option<u16>,

    /// Default model configuration (tts_infer.yaml)
    #[arg(long, env = "TTS_INFER_CONFIG")]
    tts_config: Option<PathBuf>,

    /// Speaker profile directory
    #[arg(long, env = "TTS_SPEAKER_DIR")]
    speaker_dir: Option<PathBuf>,

    /// ffmpeg binary used for ogg and aac
    #[arg(long)]
    ffmpeg: Option<PathBuf>,

    /// Log level
    #[arg(short, long, env = "TTS_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    json_logs: bool,
}

impl Args {
    /// Load the config file, then apply command-line overrides.
    fn server_config(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => ServerConfig::default(),
        };
        if let Some(host) = &self.bind_addr {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(path) = &self.tts_config {
            config.runtime.default_model_config = path.clone();
        }
        if let Some(dir) = &self.speaker_dir {
            config.runtime.speaker_dir = dir.clone();
        }
        if let Some(ffmpeg) = &self.ffmpeg {
            config.runtime.ffmpeg_path = ffmpeg.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.json_logs {
            config.logging.format = "json".to_string();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.server_config()?;

    runtime::logging::init_logging(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.host,
        port = config.port,
        default_model_config = %config.runtime.default_model_config.display(),
        "starting TTS server"
    );

    let (metrics, handle) = if config.metrics_enabled {
        let (metrics, handle) = TtsMetrics::install().context("failed to install metrics")?;
        (metrics, Some(handle))
    } else {
        (TtsMetrics::init_noop(), None)
    };

    let splitter = Arc::new(SplitterRegistry::new());
    let engine = Arc::new(MockEngine::new().with_splitter(Arc::clone(&splitter)));
    let service = Arc::new(TtsService::new(
        config.runtime.clone(),
        engine,
        splitter,
        metrics,
    ));

    runtime::preload_models(&service, &config.preload).await;

    let server = TtsServer::new(AppState::new(service, handle, config));
    let command = server.run().await.context("server failed")?;

    match command {
        Some(ControlCommand::Restart) => restart(),
        Some(ControlCommand::Exit) | None => {
            info!("server shutdown complete");
            Ok(())
        }
    }
}

/// Replace this process with a fresh copy started with the same arguments.
#[cfg(unix)]
fn restart() -> Result<()> {
    use std::os::unix::process::CommandExt;

    let exe = std::env::current_exe().context("failed to locate executable")?;
    info!(exe = %exe.display(), "restarting");
    let err = std::process::Command::new(exe)
        .args(std::env::args_os().skip(1))
        .exec();
    Err(err).context("failed to re-execute")
}

#[cfg(not(unix))]
fn restart() -> Result<()> {
    let exe = std::env::current_exe().context("failed to locate executable")?;
    info!(exe = %exe.display(), "restarting");
    std::process::Command::new(exe)
        .args(std::env::args_os().skip(1))
        .spawn()
        .context("failed to spawn replacement")?;
    Ok(())
}
