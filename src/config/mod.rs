//! Configuration module for the stream engine
//!
//! This module handles:
//! - The engine configuration file (`stream-engine.toml`)
//! - Graph definition files consumed by [`Engine::load_graph`](crate::pipeline::Engine::load_graph)
//!
//! Both are read as TOML or JSON depending on the file extension
//! (`.json` is JSON, anything else is TOML).
//!
//! # Default Location
//!
//! The engine config lives in the platform config directory:
//! - **Linux**: `~/.config/stream-engine/stream-engine.toml`
//! - **macOS**: `~/Library/Application Support/stream-engine/stream-engine.toml`
//! - **Windows**: `%APPDATA%\stream-engine\stream-engine.toml`
//!
//! # Example
//!
//! ```ignore
//! use stream_engine::config::{EngineConfig, load_graph_def};
//!
//! let config = EngineConfig::load_or_default("stream-engine.toml");
//! let graph = load_graph_def("graphs/coherence.toml")?;
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{EngineError, Result, ResultExt};
use crate::pipeline::GraphDef;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory name under the platform config dir
pub const APP_DIR: &str = "stream-engine";

/// Engine config filename
pub const CONFIG_FILE: &str = "stream-engine.toml";

/// Path of the engine config in the platform config directory
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_DIR).join(CONFIG_FILE))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileFormat {
    Toml,
    Json,
}

impl FileFormat {
    fn of(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => FileFormat::Json,
            _ => FileFormat::Toml,
        }
    }
}

fn read_file<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| EngineError::Config(format!("Failed to read {} {:?}: {}", what, path, e)))?;

    match FileFormat::of(path) {
        FileFormat::Json => serde_json::from_str(&content).map_err(|e| {
            EngineError::Config(format!("Failed to parse {} {:?}: {}", what, path, e))
        }),
        FileFormat::Toml => toml::from_str(&content).map_err(|e| {
            EngineError::Config(format!("Failed to parse {} {:?}: {}", what, path, e))
        }),
    }
}

fn write_file<T: Serialize>(value: &T, path: &Path, what: &str) -> Result<()> {
    let content = match FileFormat::of(path) {
        FileFormat::Json => serde_json::to_string_pretty(value)?,
        FileFormat::Toml => toml::to_string_pretty(value)
            .map_err(|e| EngineError::Serialization(e.to_string()))?,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    std::fs::write(path, content).with_context(|| format!("Failed to write {} {:?}", what, path))
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Tick loop settings
    pub scheduler: SchedulerConfig,

    /// Defaults for coherence nodes
    pub coherence: CoherenceConfig,

    /// Inbox settings
    pub bus: BusConfig,

    /// Logging settings for the host binary
    pub logging: LoggingConfig,

    /// Built-in producers
    pub producers: ProducerConfig,
}

impl EngineConfig {
    /// Load a config file (TOML or JSON by extension)
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        read_file(path.as_ref(), "config file")
    }

    /// Load a config file, returning defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("No config file at {:?}, using defaults", path);
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the config (TOML or JSON by extension), creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write_file(self, path.as_ref(), "config file")
    }
}

/// Load a graph definition file (TOML or JSON by extension)
pub fn load_graph_def(path: impl AsRef<Path>) -> Result<GraphDef> {
    read_file(path.as_ref(), "graph definition")
}

/// Save a graph definition file (TOML or JSON by extension)
pub fn save_graph_def(graph: &GraphDef, path: impl AsRef<Path>) -> Result<()> {
    write_file(graph, path.as_ref(), "graph definition")
}
