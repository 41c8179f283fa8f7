//! deckmerge configuration (`deckmerge.toml`).
//!
//! Defines where CLI state lives, how long idle sandboxes survive, how many
//! merge log entries stay eligible for rollback, and the log format.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration.
///
/// Missing fields use defaults. Missing file → all defaults (no error).
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeckmergeConfig {
    /// Persisted state settings.
    #[serde(default)]
    pub state: StateConfig,

    /// Sandbox lifecycle settings.
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Merge log settings.
    #[serde(default)]
    pub merge_log: MergeLogConfig,

    /// Logging settings.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

// ---------------------------------------------------------------------------
// StateConfig
// ---------------------------------------------------------------------------

/// Where the CLI keeps its per-deck-type state files.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateConfig {
    /// State directory (default: `.deckmerge`).
    #[serde(default = "default_state_dir")]
    pub dir: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: default_state_dir(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".deckmerge")
}

// ---------------------------------------------------------------------------
// SandboxConfig
// ---------------------------------------------------------------------------

/// Sandbox lifecycle settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SandboxConfig {
    /// Sandboxes idle longer than this are removed by `purge`.
    #[serde(default = "default_idle_ttl_hours")]
    pub idle_ttl_hours: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            idle_ttl_hours: default_idle_ttl_hours(),
        }
    }
}

const fn default_idle_ttl_hours() -> u64 {
    72
}

impl SandboxConfig {
    /// The idle TTL in seconds.
    #[must_use]
    pub const fn idle_ttl_secs(&self) -> u64 {
        self.idle_ttl_hours.saturating_mul(3600)
    }
}

// ---------------------------------------------------------------------------
// MergeLogConfig
// ---------------------------------------------------------------------------

/// Merge log retention.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeLogConfig {
    /// Entries kept per deck; older entries are pruned and can no longer be
    /// rolled back. Must be at least 1.
    #[serde(default = "default_retain")]
    pub retain: usize,
}

impl Default for MergeLogConfig {
    fn default() -> Self {
        Self {
            retain: default_retain(),
        }
    }
}

const fn default_retain() -> usize {
    3
}

// ---------------------------------------------------------------------------
// TelemetryConfig
// ---------------------------------------------------------------------------

/// Logging settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Output format for log events on stderr.
    #[serde(default)]
    pub format: LogFormat,
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Error loading a configuration file.
#[derive(Debug)]
pub struct ConfigError {
    /// The path that was being loaded (if available).
    pub path: Option<PathBuf>,
    /// Human-readable message with line-level detail when possible.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.path {
            write!(f, "{}: {}", p.display(), self.message)
        } else {
            write!(f, "config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl DeckmergeConfig {
    /// Load configuration from a TOML file.
    ///
    /// - If the file does not exist, returns all defaults (not an error).
    /// - If the file exists but contains invalid TOML, unknown fields or
    ///   out-of-range values, returns a [`ConfigError`].
    ///
    /// # Errors
    /// Returns `ConfigError` on I/O errors (other than not-found) or parse errors.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError {
                    path: Some(path.to_owned()),
                    message: format!("could not read file: {e}"),
                });
            }
        };
        Self::parse(&contents).map_err(|mut e| {
            e.path = Some(path.to_owned());
            e
        })
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `ConfigError` on invalid TOML, unknown fields, or a zero
    /// merge log retention.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start]
                    .chars()
                    .filter(|&c| c == '\n')
                    .count()
                    + 1;
                message = format!("line {line}: {message}");
            }
            ConfigError {
                path: None,
                message,
            }
        })?;
        if config.merge_log.retain == 0 {
            return Err(ConfigError {
                path: None,
                message: "merge_log.retain must be at least 1".to_owned(),
            });
        }
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
