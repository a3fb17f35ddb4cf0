//! External frame producers.
//!
//! A producer owns a thread that publishes [`BusFrame`](crate::pipeline::BusFrame)s
//! through a [`BusHandle`]. The engine starts its registered producers on
//! `start()` and stops them on `stop()`; everything else, including connect
//! timeouts, is the producer's own business.

pub mod synthetic;

pub use synthetic::{EegGenerator, SyntheticEegProducer};

use crate::pipeline::BusHandle;
use std::time::Duration;
use thiserror::Error;

/// Producer lifecycle errors
#[derive(Error, Debug)]
pub enum ProducerError {
    /// The producer did not come up within its connect timeout
    #[error("Producer '{name}' did not connect within {timeout:?}")]
    ConnectTimeout { name: String, timeout: Duration },

    #[error("Producer '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Failed to spawn producer thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Invalid producer configuration: {0}")]
    Config(String),
}

/// A source of bus frames running outside the scheduler thread
pub trait Producer: Send {
    fn name(&self) -> &str;

    /// Begin publishing. Blocks at most for the producer's connect timeout.
    fn start(&mut self, bus: BusHandle) -> Result<(), ProducerError>;

    /// Stop publishing and release the producer's resources
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}
