//! GPU tier failure taxonomy and the session-wide tier gate

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Why the GPU tier could not produce a result
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TierFailure {
    /// No GPU support in this build or on this machine
    #[error("GPU tier unavailable: {0}")]
    Unavailable(String),

    /// Adapter/device/pipeline creation failed
    #[error("GPU initialization failed: {0}")]
    Init(String),

    /// A dispatch or readback failed
    #[error("GPU dispatch failed: {0}")]
    Runtime(String),

    /// A dispatch did not complete within its budget
    #[error("GPU dispatch exceeded {0:?}")]
    Timeout(Duration),
}

/// Session-scoped switch shared by every coherence pipeline of an engine.
///
/// The first [`TierFailure`] demotes the whole session to CPU. Only
/// [`rearm`](Self::rearm), called when the engine starts, lets pipelines try
/// the GPU again; the epoch tells them that a new attempt is allowed.
#[derive(Debug, Default)]
pub struct TierGate {
    unavailable: AtomicBool,
    epoch: AtomicU64,
}

impl TierGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the GPU tier may be used in the current session
    pub fn is_available(&self) -> bool {
        !self.unavailable.load(Ordering::Acquire)
    }

    /// Incremented on every re-arm
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Mark the GPU tier unusable. Only the first failure of a session is
    /// logged; returns `true` for that caller.
    pub fn demote(&self, failure: &TierFailure) -> bool {
        let first = !self.unavailable.swap(true, Ordering::AcqRel);
        if first {
            match failure {
                TierFailure::Unavailable(_) => {
                    tracing::info!(%failure, "coherence running on CPU tier")
                }
                _ => tracing::error!(
                    %failure,
                    "GPU coherence tier failed, falling back to CPU for this session"
                ),
            }
        }
        first
    }

    /// Allow a fresh GPU attempt
    pub fn rearm(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.unavailable.store(false, Ordering::Release);
    }
}
