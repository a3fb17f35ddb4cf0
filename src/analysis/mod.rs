//! Numeric kernels for signal processing
//!
//! This module provides the stateless building blocks used by transform nodes
//! and by the coherence pipeline:
//! - Radix-2 FFT/IFFT over complex buffers
//! - Hilbert transform (analytic signal) and unit-phasor normalization
//! - Cascaded biquad band-pass filtering
//! - Windowed spectrum analysis and band power
//!
//! Kernels never panic on transient numeric edge cases (NaN, near-zero
//! magnitudes); they clamp or guard instead. Structural misuse such as a
//! non-power-of-two FFT length is reported through [`NumericError`].

pub mod fft;
pub mod filter;
pub mod hilbert;
pub mod spectrum;

pub use fft::{fft, ifft, next_power_of_two, zero_padded};
pub use filter::{bandpass, design_bandpass, BiquadSection};
pub use hilbert::{envelope, hilbert, normalize_unit, unit_phasors};
pub use spectrum::{Spectrum, SpectrumAnalyzer, WindowFunction};

pub use rustfft::num_complex::Complex32;

use thiserror::Error;

/// Errors reported by the numeric kernels
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NumericError {
    /// FFT input must be zero-padded to a power of two by the caller
    #[error("buffer length {0} is not a power of two")]
    NotPowerOfTwo(usize),

    /// Two buffers that must match in length do not
    #[error("length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// A divisor was too close to zero
    #[error("value {0} is too close to zero")]
    NearZero(f64),

    /// Filter band edges are not usable at the given sample rate
    #[error("invalid band: {0}")]
    InvalidBand(String),
}
