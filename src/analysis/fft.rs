//! Radix-2 Cooley-Tukey FFT
//!
//! In-place decimation-in-time transform with an explicit bit-reversal
//! permutation. Twiddles are evaluated in `f64` and narrowed, which keeps the
//! forward/inverse round trip well inside 1e-5 for window-sized buffers.

use super::{Complex32, NumericError};
use std::f64::consts::PI;

/// Smallest power of two that is `>= n` (1 for an empty input)
pub fn next_power_of_two(n: usize) -> usize {
    n.max(1).next_power_of_two()
}

/// Copy real samples into a complex buffer zero-padded to `len`
///
/// `len` is raised to `samples.len()` if it is smaller.
pub fn zero_padded(samples: &[f32], len: usize) -> Vec<Complex32> {
    let mut buffer = Vec::with_capacity(len.max(samples.len()));
    buffer.extend(samples.iter().map(|&s| Complex32::new(s, 0.0)));
    buffer.resize(len.max(samples.len()), Complex32::new(0.0, 0.0));
    buffer
}

/// Forward FFT in place. The length must be a power of two.
pub fn fft(buffer: &mut [Complex32]) -> Result<(), NumericError> {
    check_len(buffer.len())?;
    transform(buffer, false);
    Ok(())
}

/// Inverse FFT in place, including the 1/N scaling.
pub fn ifft(buffer: &mut [Complex32]) -> Result<(), NumericError> {
    check_len(buffer.len())?;
    transform(buffer, true);
    Ok(())
}

fn check_len(len: usize) -> Result<(), NumericError> {
    if len > 1 && !len.is_power_of_two() {
        return Err(NumericError::NotPowerOfTwo(len));
    }
    Ok(())
}

/// Unchecked transform; callers guarantee a power-of-two length.
pub(crate) fn transform(buffer: &mut [Complex32], inverse: bool) {
    let n = buffer.len();
    if n <= 1 {
        return;
    }

    bit_reverse_permute(buffer);

    let sign = if inverse { 1.0 } else { -1.0 };
    let mut len = 2;
    while len <= n {
        let half = len / 2;
        let step = sign * 2.0 * PI / len as f64;
        for j in 0..half {
            let angle = step * j as f64;
            let w = Complex32::new(angle.cos() as f32, angle.sin() as f32);
            let mut start = 0;
            while start < n {
                let even = buffer[start + j];
                let odd = buffer[start + j + half] * w;
                buffer[start + j] = even + odd;
                buffer[start + j + half] = even - odd;
                start += len;
            }
        }
        len <<= 1;
    }

    if inverse {
        let scale = 1.0 / n as f32;
        for c in buffer.iter_mut() {
            *c *= scale;
        }
    }
}

fn bit_reverse_permute(buffer: &mut [Complex32]) {
    let n = buffer.len();
    let bits = n.trailing_zeros();
    for i in 0..n {
        let j = i.reverse_bits() >> (usize::BITS - bits);
        if j > i {
            buffer.swap(i, j);
        }
    }
}
