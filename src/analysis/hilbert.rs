//! Hilbert transform and analytic-signal helpers

use super::fft::{next_power_of_two, transform, zero_padded};
use super::Complex32;

/// Analytic signal of a real buffer.
///
/// Zero-pads to the next power of two, zeroes the negative-frequency bins,
/// doubles the positive ones (DC and Nyquist untouched), inverts and truncates
/// back to the input length. The real part reproduces the input.
pub fn hilbert(samples: &[f32]) -> Vec<Complex32> {
    let n = samples.len();
    if n == 0 {
        return Vec::new();
    }

    let size = next_power_of_two(n);
    let mut buffer = zero_padded(samples, size);
    transform(&mut buffer, false);

    let half = size / 2;
    for bin in buffer.iter_mut().take(half).skip(1) {
        *bin *= 2.0;
    }
    for bin in buffer.iter_mut().skip(half + 1) {
        *bin = Complex32::new(0.0, 0.0);
    }

    transform(&mut buffer, true);
    buffer.truncate(n);
    buffer
}

/// Instantaneous amplitude of a real buffer
pub fn envelope(samples: &[f32]) -> Vec<f32> {
    hilbert(samples).iter().map(|c| c.norm()).collect()
}

/// Project every sample onto the unit circle in place.
///
/// Samples whose magnitude is at or below `epsilon` (or not finite) become
/// zero so they contribute nothing to a phase average.
pub fn normalize_unit(buffer: &mut [Complex32], epsilon: f32) {
    for c in buffer.iter_mut() {
        let mag = c.norm();
        if mag > epsilon && mag.is_finite() {
            *c /= mag;
        } else {
            *c = Complex32::new(0.0, 0.0);
        }
    }
}

/// Unit-phasor representation of a real signal's analytic signal
pub fn unit_phasors(samples: &[f32], epsilon: f32) -> Vec<Complex32> {
    let mut analytic = hilbert(samples);
    normalize_unit(&mut analytic, epsilon);
    analytic
}
