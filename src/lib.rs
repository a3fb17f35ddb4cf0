//! # stream-engine: tick-driven dataflow with EEG coherence
//!
//! A graph of source, transform and sink nodes evaluated once per tick in
//! dependency order. Producers publish frames on a shared bus; sources pick
//! them up, transforms compute on them, sinks publish results back.
//!
//! ## Architecture
//!
//! - **Pipeline**: graph store, execution plan and the engine tick loop
//! - **Coherence**: ciPLV between EEG channels with GPU/CPU tiers
//! - **Analysis**: FFT, band-pass filters, Hilbert envelope, band power
//! - **Producers**: threads that feed frames into the bus
//! - **Communication**: crossbeam channels between the engine thread and its host
//!
//! ## Configuration
//!
//! The engine config is read from `stream-engine.toml` in the platform config
//! directory (see [`config`]). Graphs are TOML or JSON files of node
//! definitions.
//!
//! ## Example
//!
//! ```ignore
//! use stream_engine::{
//!     config::EngineConfig,
//!     pipeline::{Engine, GraphDef, NodeDef},
//! };
//!
//! let mut engine = Engine::new(&EngineConfig::default());
//! engine.load_graph(
//!     GraphDef::new("demo")
//!         .node(NodeDef::source("eeg").with("source_id", "eeg"))
//!         .node(NodeDef::transform("coh").op("coherence").input("eeg"))
//!         .node(NodeDef::sink("out").input("coh")),
//! )?;
//!
//! let (bridge, handle) = engine.spawn()?;
//! bridge.start();
//! ```

pub mod analysis;
pub mod coherence;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod producer;
pub mod types;

// Re-export commonly used types
pub use coherence::{CoherenceMatrix, ComputeTier};
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use pipeline::{BusFrame, Engine, EngineBridge, GraphDef, NodeDef, Value};
pub use producer::{Producer, SyntheticEegProducer};
pub use types::{Clock, ManualClock, SystemClock};
