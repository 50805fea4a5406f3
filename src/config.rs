//! Engine configuration
//!
//! Loaded from a TOML file; every section and field falls back to its
//! default when absent.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::{DUPLEX_RING_PERIODS, STREAM_MAX};
use crate::error::{Error, Result};
use crate::host::ConverterQuality;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub context: ContextConfig,
    pub stream: StreamConfig,
    pub logging: LoggingConfig,
}

/// Process-wide stream registry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Cap applied when stream limiting is in effect
    pub max_streams: usize,

    /// Force stream limiting on or off. `None` asks the host.
    pub limit_streams: Option<bool>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_streams: STREAM_MAX,
            limit_streams: None,
        }
    }
}

/// Per-stream settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Resize the host buffer from the requested latency. Off by default:
    /// the buffer size is process-wide on the host and some class-compliant
    /// devices misbehave when it changes.
    pub apply_latency_hint: bool,

    /// Capture blocks held between the input and output side of a duplex stream
    pub duplex_ring_periods: usize,

    /// Quality requested from input sample rate converters
    pub converter_quality: ConverterQuality,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            apply_latency_hint: false,
            duplex_ring_periods: DUPLEX_RING_PERIODS,
            converter_quality: ConverterQuality::Max,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Read configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&text).map_err(|e| {
            Error::Config(format!("{}: {}", path.as_ref().display(), e))
        })
    }

    /// Write configuration as TOML, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("serialize: {}", e)))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Platform config location, if a home directory can be resolved
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "audio-stream-engine")
            .map(|dirs| dirs.config_dir().join("engine.toml"))
    }

    /// Load from [`EngineConfig::default_path`], falling back to defaults
    /// when the file is missing or unreadable
    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring config at {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}
