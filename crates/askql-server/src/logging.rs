//! Structured logging for the AskQL server
//!
//! Features:
//! - Structured JSON logging for production
//! - Human-readable console logging for development
//! - File rotation with daily log files
//! - Per-request spans (request id, session, query fingerprint) from askql-core

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

/// Log format configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format for development
    Pretty,
    /// JSON format for production (structured logging)
    Json,
    /// Compact format for testing
    Compact,
}

impl LogFormat {
    pub fn parse(value: &str) -> Self {
        match value {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }
}

/// Log output configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    /// Log to stdout only
    Stdout,
    /// Log to file only
    File,
    /// Log to both stdout and file
    Both,
}

impl LogOutput {
    pub fn parse(value: &str) -> Self {
        match value {
            "file" => LogOutput::File,
            "both" => LogOutput::Both,
            _ => LogOutput::Stdout,
        }
    }
}

fn env_filter(level: &str) -> EnvFilter {
    let mut filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    // Filter out noisy third-party crates
    for directive in ["hyper=warn", "tokio=warn", "runtime=warn", "tower=warn", "h2=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Initialize the logging system from the resolved configuration.
///
/// ```bash
/// # Development: pretty console output at debug level
/// RUST_LOG=debug LOG_FORMAT=pretty cargo run
///
/// # Production: JSON to file with info level
/// RUST_LOG=info LOG_FORMAT=json LOG_OUTPUT=file LOG_DIR=/var/log/askql cargo run
/// ```
pub fn init(config: &LoggingConfig) {
    let format = LogFormat::parse(&config.format);
    let output = LogOutput::parse(&config.output);
    let env_filter = env_filter(&config.level);

    match (output, format) {
        // Stdout only
        (LogOutput::Stdout, LogFormat::Pretty) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty().with_thread_ids(true).with_target(true))
                .init();
        }
        (LogOutput::Stdout, LogFormat::Json) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_current_span(true))
                .init();
        }
        (LogOutput::Stdout, LogFormat::Compact) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().compact())
                .init();
        }
        // File only
        (LogOutput::File, _) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(file_appender(config)).with_ansi(false))
                .init();
        }
        // Both stdout and file - use boxed layers for dynamic dispatch
        (LogOutput::Both, format) => {
            let stdout_layer = match format {
                LogFormat::Pretty => fmt::layer()
                    .pretty()
                    .with_thread_ids(true)
                    .with_target(true)
                    .boxed(),
                LogFormat::Json => fmt::layer().json().with_current_span(true).boxed(),
                LogFormat::Compact => fmt::layer().compact().boxed(),
            };

            let file_layer = fmt::layer()
                .with_writer(file_appender(config))
                .with_ansi(false)
                .boxed();

            tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer)
                .with(file_layer)
                .init();
        }
    }

    tracing::info!(
        format = ?format,
        output = ?output,
        level = %config.level,
        "Logging system initialized"
    );
    if matches!(output, LogOutput::File | LogOutput::Both) {
        tracing::debug!("  LOG_DIR: {}", config.directory);
    }
}

fn file_appender(config: &LoggingConfig) -> RollingFileAppender {
    std::fs::create_dir_all(&config.directory).ok();
    RollingFileAppender::new(Rotation::DAILY, &config.directory, "askql-server.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("compact"), LogFormat::Compact);
        assert_eq!(LogFormat::parse("fancy"), LogFormat::Pretty);
    }

    #[test]
    fn test_log_output_parse() {
        assert_eq!(LogOutput::parse("file"), LogOutput::File);
        assert_eq!(LogOutput::parse("both"), LogOutput::Both);
        assert_eq!(LogOutput::parse("stdout"), LogOutput::Stdout);
        assert_eq!(LogOutput::parse(""), LogOutput::Stdout);
    }
}
