//! CPU reference tier

use super::{pair_indices, CoherenceBackend, KernelParams};
use crate::analysis::{unit_phasors, Complex32};
use crate::coherence::matrix::ComputeTier;
use crate::coherence::tier::TierFailure;

/// Complex mean of `a[n] * conj(b[n])` over the shorter of the two buffers
pub fn phase_locking(a: &[Complex32], b: &[Complex32]) -> Complex32 {
    let n = a.len().min(b.len());
    if n == 0 {
        return Complex32::new(0.0, 0.0);
    }
    let sum: Complex32 = a.iter().zip(b).map(|(x, y)| x * y.conj()).sum();
    sum / n as f32
}

/// Corrected imaginary PLV from a complex phase-locking mean.
///
/// Returns 0 when the denominator is at or below `floor` and clamps the
/// result into `[0, 1]`; NaN inputs also yield 0.
pub fn ciplv(mean: Complex32, floor: f32) -> f32 {
    let denominator = (1.0 - mean.re * mean.re).max(0.0).sqrt();
    if denominator.is_nan() || denominator <= floor {
        return 0.0;
    }
    let value = mean.im.abs() / denominator;
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Runs both passes with the in-crate FFT kernels
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        Self
    }

    /// Raw ciPLV for every pair; never fails
    pub fn compute(&self, channels: &[Vec<f32>], params: &KernelParams) -> Vec<f32> {
        let phasors: Vec<Vec<Complex32>> = channels
            .iter()
            .map(|c| unit_phasors(c, params.epsilon))
            .collect();

        pair_indices(channels.len())
            .into_iter()
            .map(|(i, j)| ciplv(phase_locking(&phasors[i], &phasors[j]), params.denominator_floor))
            .collect()
    }
}

impl CoherenceBackend for CpuBackend {
    fn tier(&self) -> ComputeTier {
        ComputeTier::Cpu
    }

    fn backend_name(&self) -> &'static str {
        "cpu"
    }

    fn pairwise(
        &mut self,
        channels: &[Vec<f32>],
        params: &KernelParams,
    ) -> Result<Vec<f32>, TierFailure> {
        Ok(self.compute(channels, params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn tone(freq: f32, fs: f32, n: usize, phase: f32) -> Vec<f32> {
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f32 / fs + phase).sin())
            .collect()
    }

    #[test]
    fn test_ciplv_guards_zero_lag() {
        // Perfect zero-lag locking has no imaginary part and a zero denominator.
        assert_eq!(ciplv(Complex32::new(1.0, 0.0), 1e-6), 0.0);
        assert_eq!(ciplv(Complex32::new(f32::NAN, 0.0), 1e-6), 0.0);
    }

    #[test]
    fn test_ciplv_quadrature_lock_is_one() {
        assert!((ciplv(Complex32::new(0.0, 1.0), 1e-6) - 1.0).abs() < 1e-6);
        assert!((ciplv(Complex32::new(0.0, -0.5), 1e-6) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_ciplv_is_clamped() {
        let v = ciplv(Complex32::new(0.9, 0.9), 1e-6);
        assert!((0.0..=1.0).contains(&v));
    }

    #[test]
    fn test_phase_locking_of_identical_phasors() {
        let a = vec![Complex32::new(0.6, 0.8); 16];
        let mean = phase_locking(&a, &a);
        assert!((mean.re - 1.0).abs() < 1e-6);
        assert!(mean.im.abs() < 1e-6);
        assert_eq!(phase_locking(&[], &a), Complex32::new(0.0, 0.0));
    }

    #[test]
    fn test_lagged_tones_are_locked() {
        let fs = 256.0;
        let channels = vec![tone(10.0, fs, 256, 0.0), tone(10.0, fs, 256, PI / 2.0)];
        let values = CpuBackend::new().compute(&channels, &KernelParams::default());
        assert_eq!(values.len(), 1);
        assert!(values[0] > 0.95, "ciPLV {}", values[0]);

        // Zero lag carries no imaginary coupling
        let same = vec![tone(10.0, fs, 256, 0.0), tone(10.0, fs, 256, 0.0)];
        assert_eq!(CpuBackend::new().compute(&same, &KernelParams::default()), vec![0.0]);
    }

    #[test]
    fn test_backend_trait_reports_cpu() {
        let mut backend = CpuBackend::new();
        assert_eq!(backend.tier(), ComputeTier::Cpu);
        let channels = vec![vec![0.0; 8], vec![0.0; 8], vec![0.0; 8]];
        let values = backend.pairwise(&channels, &KernelParams::default()).unwrap();
        assert_eq!(values, vec![0.0, 0.0, 0.0]);
    }
}
