//! # Coherence
//!
//! Corrected imaginary phase-locking value (ciPLV) between EEG channels.
//!
//! - [`ChannelAggregator`] keeps a rolling window per channel and drops
//!   channels that stop reporting.
//! - [`CoherencePipeline`] band-passes the windows, computes raw ciPLV on the
//!   GPU or CPU tier, and smooths the result into a [`CoherenceMatrix`].
//! - [`TierGate`] makes the first GPU failure of a session demote every
//!   pipeline sharing it.
//!
//! For unit phasors `u` and `v` of two channels with mean
//! `m = mean(u[n] * conj(v[n]))`:
//!
//! ```text
//! ciPLV = |Im(m)| / sqrt(1 - Re(m)^2)
//! ```
//!
//! Zero-lag coupling (volume conduction) carries no imaginary part and scores 0.

pub mod aggregator;
pub mod backend;
pub mod matrix;
pub mod pipeline;
pub mod tier;

pub use aggregator::ChannelAggregator;
pub use backend::{
    default_backend_factory, BackendFactory, CoherenceBackend, CpuBackend, KernelParams,
};
pub use matrix::{
    is_valid_channel_name, pair_key, split_pair_key, CoherenceMatrix, ComputeTier, PAIR_SEPARATOR,
};
pub use pipeline::CoherencePipeline;
pub use tier::{TierFailure, TierGate};
