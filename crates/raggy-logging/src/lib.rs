//! Structured logging for Raggy nodes
//!
//! Installs a `tracing` subscriber with console output (pretty or JSONL) and
//! optional rolling JSONL files named after the node.
//!
//! # Quick Start
//!
//! ```ignore
//! use raggy_logging::{RaggySubscriberBuilder, LogConfig};
//!
//! // JSONL to console, iroh quieted
//! RaggySubscriberBuilder::new().init()?;
//!
//! // Per-node files in production; keep the guard alive
//! let _guard = RaggySubscriberBuilder::new()
//!     .with_config(LogConfig::production("/var/log/raggy", &node_id))
//!     .init()?;
//! ```
//!
//! Background loops run inside [`node_span`]:
//!
//! ```ignore
//! use tracing::Instrument;
//!
//! tokio::spawn(sync_loop.instrument(raggy_logging::node_span(&node_id, "sync")));
//! ```

pub mod config;
pub mod context;
pub mod error;

pub use config::{ConsoleFormat, FileConfig, LogConfig, RotationStrategy};
pub use context::node_span;
pub use error::LogError;

use std::fs::{self, File};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Builder for configuring and initializing the Raggy logging subscriber
pub struct RaggySubscriberBuilder {
    config: LogConfig,
}

impl RaggySubscriberBuilder {
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a per-target directive such as `raggy_node::sync=trace`
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.config.directives.push(directive.into());
        self
    }

    pub fn with_console(mut self, format: ConsoleFormat) -> Self {
        self.config.console = format;
        self
    }

    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    /// `RUST_LOG` when set, otherwise the configured directives
    fn env_filter(&self) -> Result<EnvFilter, LogError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(self.config.filter_directives())
            .map_err(|e| LogError::Filter(e.to_string()))
    }

    /// Install the subscriber globally
    ///
    /// Returns the file writer guard when file output is configured; keep it
    /// alive for the duration of the program or buffered lines are lost.
    pub fn init(self) -> Result<Option<WorkerGuard>, LogError> {
        let env_filter = self.env_filter()?;

        let pretty_console = match self.config.console {
            ConsoleFormat::Pretty { ansi } => Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(ansi)
                    .with_target(true),
            ),
            _ => None,
        };

        let json_console = (self.config.console == ConsoleFormat::Json).then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .flatten_event(true)
        });

        let (file_layer, guard) = match &self.config.file {
            Some(file_config) => {
                let (writer, guard) = file_writer(file_config)?;
                let layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .flatten_event(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_ansi(false)
                    .with_writer(writer);
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        Registry::default()
            .with(env_filter)
            .with(pretty_console)
            .with(json_console)
            .with(file_layer)
            .try_init()
            .map_err(|e| LogError::AlreadyInitialized(e.to_string()))?;

        Ok(guard)
    }
}

impl Default for RaggySubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Open the configured log file; a single file is truncated, rolling files append
fn file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LogError> {
    let rotation = match config.rotation {
        RotationStrategy::Never => {
            fs::create_dir_all(&config.directory)?;
            let path = config.directory.join(format!("{}.jsonl", config.file_prefix));
            return Ok(tracing_appender::non_blocking(File::create(path)?));
        }
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
    };

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(&config.file_prefix)
        .filename_suffix("jsonl");
    if let Some(max) = config.max_files {
        builder = builder.max_log_files(max);
    }
    let appender = builder
        .build(&config.directory)
        .map_err(|e| LogError::Appender(e.to_string()))?;

    Ok(tracing_appender::non_blocking(appender))
}

/// Initialize logging with default settings (JSONL to console)
pub fn init_default() -> Result<(), LogError> {
    RaggySubscriberBuilder::new().init().map(|_| ())
}

/// Initialize logging for development (debug raggy output, pretty console)
pub fn init_development() -> Result<(), LogError> {
    RaggySubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init()
        .map(|_| ())
}

/// Initialize logging for tests; repeated calls are harmless
pub fn init_testing() {
    let _ = RaggySubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .init();
}

#[cfg(test)]
mod tests {
    use raggy_core::NodeId;

    use super::*;

    #[test]
    fn test_builder_overrides() {
        let builder = RaggySubscriberBuilder::new()
            .with_directive("raggy_node::sync=trace")
            .with_console(ConsoleFormat::Off)
            .with_file_output(FileConfig::for_node("./logs", &NodeId::from("A")));

        assert_eq!(builder.config.console, ConsoleFormat::Off);
        assert!(
            builder
                .config
                .filter_directives()
                .ends_with(",raggy_node::sync=trace")
        );
        assert_eq!(builder.config.file.unwrap().file_prefix, "raggy-A");
    }

    #[test]
    fn test_configured_directives_parse() {
        for config in [
            LogConfig::default(),
            LogConfig::development(),
            LogConfig::testing(),
        ] {
            assert!(EnvFilter::try_new(config.filter_directives()).is_ok());
        }
        assert!(EnvFilter::try_new("info,raggy_node=loudest").is_err());
    }

    #[test]
    fn test_init_testing_twice_is_harmless() {
        init_testing();
        init_testing();
        assert!(init_default().is_err());
    }
}
