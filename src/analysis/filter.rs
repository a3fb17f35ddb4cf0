//! Cascaded biquad band-pass filtering
//!
//! Each call runs with fresh filter state. Callers that need continuity
//! across blocks must prepend overlap samples themselves.

use super::NumericError;
use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type};
use serde::{Deserialize, Serialize};

/// One second-order section, normalized so that `a0 == 1`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BiquadSection {
    pub b0: f32,
    pub b1: f32,
    pub b2: f32,
    pub a1: f32,
    pub a2: f32,
}

impl BiquadSection {
    /// Build from `[b0, b1, b2, a1, a2]`
    pub const fn from_array(c: [f32; 5]) -> Self {
        Self {
            b0: c[0],
            b1: c[1],
            b2: c[2],
            a1: c[3],
            a2: c[4],
        }
    }

    pub fn to_array(&self) -> [f32; 5] {
        [self.b0, self.b1, self.b2, self.a1, self.a2]
    }

    fn coefficients(&self) -> Coefficients<f32> {
        Coefficients {
            a1: self.a1,
            a2: self.a2,
            b0: self.b0,
            b1: self.b1,
            b2: self.b2,
        }
    }
}

impl From<Coefficients<f32>> for BiquadSection {
    fn from(c: Coefficients<f32>) -> Self {
        Self {
            b0: c.b0,
            b1: c.b1,
            b2: c.b2,
            a1: c.a1,
            a2: c.a2,
        }
    }
}

/// Run `samples` through every section in order.
///
/// Non-finite outputs are flushed to zero so a single bad sample cannot
/// poison the rest of the window.
pub fn bandpass(samples: &[f32], sections: &[BiquadSection]) -> Vec<f32> {
    let mut out = samples.to_vec();
    for section in sections {
        let mut stage = DirectForm2Transposed::<f32>::new(section.coefficients());
        for x in out.iter_mut() {
            let y = stage.run(if x.is_finite() { *x } else { 0.0 });
            *x = if y.is_finite() { y } else { 0.0 };
        }
    }
    out
}

/// Design `stages` identical band-pass sections centred on the geometric mean
/// of the band edges, with Q set by the bandwidth.
pub fn design_bandpass(
    low_hz: f32,
    high_hz: f32,
    sample_rate_hz: f32,
    stages: usize,
) -> Result<Vec<BiquadSection>, NumericError> {
    let nyquist = sample_rate_hz / 2.0;
    if !(low_hz > 0.0 && low_hz < high_hz && high_hz < nyquist) {
        return Err(NumericError::InvalidBand(format!(
            "{} Hz..{} Hz at fs={} Hz",
            low_hz, high_hz, sample_rate_hz
        )));
    }

    let center = (low_hz * high_hz).sqrt();
    let q = center / (high_hz - low_hz);
    let coeffs = Coefficients::<f32>::from_params(
        Type::BandPass,
        sample_rate_hz.hz(),
        center.hz(),
        q,
    )
    .map_err(|e| NumericError::InvalidBand(format!("{:?}", e)))?;

    Ok(vec![BiquadSection::from(coeffs); stages.max(1)])
}
