//! Subscriber setup for the server binary.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};
use tts_core::LoggingConfig;

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Text,
    #[default]
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("json") {
            Ok(Self::Json)
        } else if s.eq_ignore_ascii_case("text") || s.eq_ignore_ascii_case("pretty") {
            Ok(Self::Text)
        } else {
            Err(format!("unknown log format: {s}"))
        }
    }
}

/// Install the global subscriber described by `config`.
///
/// `RUST_LOG` wins over `config.level`. An unknown format means JSON. Only
/// the first call installs anything.
pub fn init_logging(config: &LoggingConfig) {
    let format: LogFormat = config.format.parse().unwrap_or_default();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    // One line per request span, written when it closes.
    let text = (format == LogFormat::Text).then(|| {
        fmt::layer()
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
    });
    let json = (format == LogFormat::Json).then(|| {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
    });

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .try_init();
    if installed.is_err() {
        tracing::debug!(format = ?format, "subscriber already installed, keeping it");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_names() {
        assert_eq!("Json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("pretty".parse::<LogFormat>(), Ok(LogFormat::Text));
        assert!("logfmt".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_second_init_keeps_first_subscriber() {
        let text = LoggingConfig {
            level: "warn".to_string(),
            format: "text".to_string(),
        };
        init_logging(&text);
        init_logging(&LoggingConfig::default());
    }
}
