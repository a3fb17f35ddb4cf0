//! Compute backends for the pairwise coherence math
//!
//! Both tiers receive band-passed channels of equal length and return the raw
//! ciPLV of every pair `(i, j)` with `i < j`, in row-major upper-triangle
//! order (see [`pair_indices`]). Filtering, smoothing and key bookkeeping stay
//! in [`CoherencePipeline`](super::CoherencePipeline) so the tiers differ
//! only in execution substrate.

pub mod cpu;
#[cfg(feature = "gpu")]
pub mod wgpu_backend;

pub use cpu::CpuBackend;
#[cfg(feature = "gpu")]
pub use wgpu_backend::WgpuBackend;

use super::matrix::ComputeTier;
use super::tier::TierFailure;
use std::sync::Arc;
use std::time::Duration;

/// Numeric guards and budgets shared by both tiers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelParams {
    /// Magnitudes at or below this are treated as zero during unit normalization
    pub epsilon: f32,
    /// ciPLV denominators at or below this yield 0
    pub denominator_floor: f32,
    /// Upper bound on one GPU dispatch including readback
    pub timeout: Duration,
}

impl Default for KernelParams {
    fn default() -> Self {
        Self {
            epsilon: 1e-6,
            denominator_floor: 1e-6,
            timeout: Duration::from_millis(50),
        }
    }
}

/// A substrate capable of running the analytic-signal and pairwise passes
#[cfg_attr(test, mockall::automock)]
pub trait CoherenceBackend: Send {
    /// Tier reported in the resulting matrix
    fn tier(&self) -> ComputeTier;

    /// Human-readable backend name for logs
    fn backend_name(&self) -> &'static str;

    /// Raw ciPLV for every channel pair.
    fn pairwise(
        &mut self,
        channels: &[Vec<f32>],
        params: &KernelParams,
    ) -> Result<Vec<f32>, TierFailure>;
}

/// Constructor for the accelerated tier, invoked lazily once per session
pub type BackendFactory =
    Arc<dyn Fn() -> Result<Box<dyn CoherenceBackend>, TierFailure> + Send + Sync>;

/// Factory for the accelerated tier available in this build
pub fn default_backend_factory() -> BackendFactory {
    Arc::new(create_accelerator)
}

#[cfg(feature = "gpu")]
fn create_accelerator() -> Result<Box<dyn CoherenceBackend>, TierFailure> {
    Ok(Box::new(WgpuBackend::new()?))
}

#[cfg(not(feature = "gpu"))]
fn create_accelerator() -> Result<Box<dyn CoherenceBackend>, TierFailure> {
    Err(TierFailure::Unavailable(
        "built without the `gpu` feature".to_string(),
    ))
}

/// Upper-triangle pair indices for `n` channels
pub fn pair_indices(n: usize) -> Vec<(usize, usize)> {
    let mut pairs = Vec::with_capacity(n * n.saturating_sub(1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            pairs.push((i, j));
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_indices() {
        assert!(pair_indices(0).is_empty());
        assert!(pair_indices(1).is_empty());
        assert_eq!(pair_indices(3), vec![(0, 1), (0, 2), (1, 2)]);
        assert_eq!(pair_indices(8).len(), 28);
    }

    #[cfg(not(feature = "gpu"))]
    #[test]
    fn test_default_factory_without_gpu_feature() {
        let factory = default_backend_factory();
        match factory() {
            Err(TierFailure::Unavailable(_)) => {}
            Err(other) => panic!("unexpected failure {other}"),
            Ok(_) => panic!("accelerator should not exist without the gpu feature"),
        }
    }
}
