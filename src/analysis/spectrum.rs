//! Windowed spectrum analysis
//!
//! Backs the `band_power` transform node. Uses rustfft for arbitrary lengths;
//! the coherence path uses the in-crate radix-2 kernels instead so both
//! compute tiers share one definition of the transform.

use rustfft::{num_complex::Complex, FftPlanner};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::str::FromStr;

/// Window function applied before the transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowFunction {
    /// No windowing
    Rectangular,
    /// Hann window (good general purpose)
    #[default]
    Hann,
    /// Hamming window (reduced side lobes)
    Hamming,
    /// Blackman window (very low side lobes)
    Blackman,
    /// Flat-top window (accurate amplitude measurement)
    FlatTop,
}

impl WindowFunction {
    pub fn all() -> &'static [WindowFunction] {
        &[
            WindowFunction::Rectangular,
            WindowFunction::Hann,
            WindowFunction::Hamming,
            WindowFunction::Blackman,
            WindowFunction::FlatTop,
        ]
    }

    /// Weight of sample `i` in a window of `n` samples
    pub fn weight(&self, i: usize, n: usize) -> f64 {
        let phase = 2.0 * PI * i as f64 / n as f64;
        match self {
            WindowFunction::Rectangular => 1.0,
            WindowFunction::Hann => 0.5 - 0.5 * phase.cos(),
            WindowFunction::Hamming => 0.54 - 0.46 * phase.cos(),
            // Endpoints can come out as -eps in floating point.
            WindowFunction::Blackman => {
                (0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos()).max(0.0)
            }
            WindowFunction::FlatTop => {
                const A: [f64; 5] = [0.21557895, 0.41663158, 0.277263158, 0.083578947, 0.006947368];
                A[0] - A[1] * phase.cos() + A[2] * (2.0 * phase).cos()
                    - A[3] * (3.0 * phase).cos()
                    + A[4] * (4.0 * phase).cos()
            }
        }
    }

    /// Mean weight, used to undo the window's amplitude loss
    fn coherent_gain(&self, n: usize) -> f64 {
        if n == 0 {
            return 1.0;
        }
        let sum: f64 = (0..n).map(|i| self.weight(i, n)).sum();
        (sum / n as f64).max(f64::EPSILON)
    }
}

impl FromStr for WindowFunction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rectangular" | "none" => Ok(WindowFunction::Rectangular),
            "hann" | "hanning" => Ok(WindowFunction::Hann),
            "hamming" => Ok(WindowFunction::Hamming),
            "blackman" => Ok(WindowFunction::Blackman),
            "flat_top" | "flattop" => Ok(WindowFunction::FlatTop),
            other => Err(format!("unknown window function '{}'", other)),
        }
    }
}

/// One-sided amplitude spectrum of a real signal
#[derive(Debug, Clone, Default)]
pub struct Spectrum {
    /// Bin centre frequencies (Hz)
    pub frequencies: Vec<f64>,
    /// Single-sided amplitude per bin
    pub magnitudes: Vec<f64>,
    /// Amplitude in dB (floored at -200)
    pub psd_db: Vec<f64>,
    /// Hz per bin
    pub resolution_hz: f64,
}

impl Spectrum {
    /// Frequency and amplitude of the strongest bin
    pub fn peak(&self) -> Option<(f64, f64)> {
        self.magnitudes
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, &m)| (self.frequencies[i], m))
    }

    /// Mean-square amplitude of the bins inside `[low_hz, high_hz]`
    pub fn band_power(&self, low_hz: f64, high_hz: f64) -> f64 {
        self.frequencies
            .iter()
            .zip(&self.magnitudes)
            .filter(|(&f, _)| f >= low_hz && f <= high_hz)
            .map(|(_, &m)| m * m / 2.0)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.magnitudes.is_empty()
    }
}

/// Spectrum analyzer with a cached FFT planner
pub struct SpectrumAnalyzer {
    planner: FftPlanner<f64>,
    window: WindowFunction,
    remove_dc: bool,
}

impl SpectrumAnalyzer {
    pub fn new(window: WindowFunction) -> Self {
        Self {
            planner: FftPlanner::new(),
            window,
            remove_dc: true,
        }
    }

    /// Keep the DC component in the output
    pub fn keep_dc(mut self) -> Self {
        self.remove_dc = false;
        self
    }

    pub fn window(&self) -> WindowFunction {
        self.window
    }

    /// Compute the one-sided spectrum of `samples`
    pub fn compute(&mut self, samples: &[f32], sample_rate_hz: f64) -> Spectrum {
        let n = samples.len();
        if n == 0 || sample_rate_hz <= 0.0 {
            return Spectrum::default();
        }

        let mean = if self.remove_dc {
            samples.iter().map(|&s| s as f64).sum::<f64>() / n as f64
        } else {
            0.0
        };

        let mut buffer: Vec<Complex<f64>> = samples
            .iter()
            .enumerate()
            .map(|(i, &s)| Complex::new((s as f64 - mean) * self.window.weight(i, n), 0.0))
            .collect();

        self.planner.plan_fft_forward(n).process(&mut buffer);

        let resolution_hz = sample_rate_hz / n as f64;
        let bins = n / 2 + 1;
        let gain = self.window.coherent_gain(n);

        let frequencies: Vec<f64> = (0..bins).map(|i| i as f64 * resolution_hz).collect();
        let magnitudes: Vec<f64> = buffer
            .iter()
            .take(bins)
            .enumerate()
            .map(|(i, c)| {
                let scale = if i == 0 || (n % 2 == 0 && i == n / 2) { 1.0 } else { 2.0 };
                scale * c.norm() / (n as f64 * gain)
            })
            .collect();
        let psd_db = magnitudes
            .iter()
            .map(|&m| if m > 1e-10 { 20.0 * m.log10() } else { -200.0 })
            .collect();

        Spectrum {
            frequencies,
            magnitudes,
            psd_db,
            resolution_hz,
        }
    }
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new(WindowFunction::default())
    }
}
