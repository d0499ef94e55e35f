//! Logging configuration for Raggy nodes

use std::path::PathBuf;

use raggy_core::NodeId;
use serde::{Deserialize, Serialize};

/// Targets whose `info` output drowns out node events
const QUIET_TARGETS: &[&str] = &["iroh=warn", "iroh_gossip=warn", "iroh_quinn=warn"];

/// Subscriber configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Fallback level when `RUST_LOG` is unset
    pub level: String,
    /// Per-target directives layered over `level`
    pub directives: Vec<String>,
    pub console: ConsoleFormat,
    /// Rolling JSONL output, if any
    pub file: Option<FileConfig>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directives: QUIET_TARGETS.iter().map(|d| d.to_string()).collect(),
            console: ConsoleFormat::Json,
            file: None,
        }
    }
}

impl LogConfig {
    /// Debug output from the raggy crates, pretty console
    pub fn development() -> Self {
        let mut directives: Vec<String> = ["raggy_core", "raggy_gossip", "raggy_node"]
            .iter()
            .map(|target| format!("{target}=debug"))
            .collect();
        directives.extend(QUIET_TARGETS.iter().map(|d| d.to_string()));

        Self {
            directives,
            console: ConsoleFormat::Pretty { ansi: true },
            ..Default::default()
        }
    }

    /// JSONL files only, one file set per node
    pub fn production(log_dir: impl Into<PathBuf>, node_id: &NodeId) -> Self {
        Self {
            console: ConsoleFormat::Off,
            file: Some(FileConfig::for_node(log_dir, node_id)),
            ..Default::default()
        }
    }

    /// Warnings only, plain console
    pub fn testing() -> Self {
        Self {
            level: "warn".to_string(),
            directives: Vec::new(),
            console: ConsoleFormat::Pretty { ansi: false },
            file: None,
        }
    }

    /// The `EnvFilter` directive string
    pub fn filter_directives(&self) -> String {
        std::iter::once(self.level.as_str())
            .chain(self.directives.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Console output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsoleFormat {
    /// Human-readable lines
    Pretty { ansi: bool },
    /// One JSON object per line
    Json,
    Off,
}

/// Rolling JSONL file output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileConfig {
    pub directory: PathBuf,
    pub file_prefix: String,
    pub rotation: RotationStrategy,
    /// Rotated files to keep; `None` keeps everything
    pub max_files: Option<usize>,
}

impl FileConfig {
    /// Files named after `node_id`, so nodes sharing a directory do not interleave
    pub fn for_node(directory: impl Into<PathBuf>, node_id: &NodeId) -> Self {
        let id: String = node_id
            .short_id()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();

        Self {
            directory: directory.into(),
            file_prefix: format!("raggy-{id}"),
            rotation: RotationStrategy::Daily,
            max_files: Some(14),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RotationStrategy {
    #[default]
    Daily,
    Hourly,
    /// One file, truncated at startup
    Never,
}
