//! Engine configuration sections
//!
//! Each section maps to a table in `stream-engine.toml`:
//!
//! - [`SchedulerConfig`] - tick rate and stats cadence
//! - [`CoherenceConfig`] - ciPLV window, decay, smoothing, band and GPU policy
//! - [`BusConfig`] - engine inbox sizing
//! - [`LoggingConfig`] - tracing filter and optional log directory
//! - [`ProducerConfig`] - built-in producers started by the host binary
//!
//! Every field has a default, so partial files are valid.

use crate::coherence::KernelParams;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default tick rate in Hz
pub const DEFAULT_TICK_RATE_HZ: u32 = 30;

/// Default sliding window per channel, in samples
pub const DEFAULT_WINDOW_SIZE: usize = 256;

/// Default channel decay in milliseconds
pub const DEFAULT_DECAY_MS: u64 = 3000;

/// Default EMA smoothing factor for coherence values
pub const DEFAULT_SMOOTHING_ALPHA: f32 = 0.15;

/// Scheduler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Target ticks per second
    pub tick_rate_hz: u32,

    /// Interval between periodic stats messages
    pub stats_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: DEFAULT_TICK_RATE_HZ,
            stats_interval_ms: 500,
        }
    }
}

impl SchedulerConfig {
    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }
}

/// Coherence pipeline settings, used as defaults for every coherence node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoherenceConfig {
    /// Samples kept per channel
    pub window_size: usize,

    /// Channels silent for longer than this are pruned
    pub decay_ms: u64,

    /// EMA factor: `prev * (1 - alpha) + raw * alpha`
    pub smoothing_alpha: f32,

    /// Sample rate of incoming channels
    pub sample_rate_hz: f32,

    /// Lower band-pass edge
    pub band_low_hz: f32,

    /// Upper band-pass edge
    pub band_high_hz: f32,

    /// Number of cascaded biquad sections
    pub filter_stages: usize,

    /// Unit-normalization guard
    pub epsilon: f32,

    /// ciPLV denominators at or below this yield 0
    pub denominator_floor: f32,

    /// Try the GPU tier before falling back to CPU
    pub prefer_gpu: bool,

    /// Budget for one GPU dispatch including readback
    pub gpu_timeout_ms: u64,
}

impl Default for CoherenceConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            decay_ms: DEFAULT_DECAY_MS,
            smoothing_alpha: DEFAULT_SMOOTHING_ALPHA,
            sample_rate_hz: 256.0,
            band_low_hz: 8.0,
            band_high_hz: 13.0,
            filter_stages: 2,
            epsilon: 1e-6,
            denominator_floor: 1e-6,
            prefer_gpu: true,
            gpu_timeout_ms: 50,
        }
    }
}

impl CoherenceConfig {
    /// Kernel guards and the GPU budget derived from this config
    pub fn kernel_params(&self) -> KernelParams {
        KernelParams {
            epsilon: self.epsilon,
            denominator_floor: self.denominator_floor,
            timeout: Duration::from_millis(self.gpu_timeout_ms),
        }
    }
}

/// Bus settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Frames buffered between producers and the next tick
    pub inbox_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: 1024,
        }
    }
}

/// Logging settings for the host binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,

    /// Directory for daily-rotated log files; stdout only when unset
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,stream_engine=debug".to_string(),
            log_dir: None,
        }
    }
}

/// Synthetic EEG producer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticEegConfig {
    /// `source_id` stamped on every frame
    pub source_id: String,

    /// Channel names, one oscillator each
    pub channels: Vec<String>,

    /// Sample rate of the generated signal
    pub sample_rate_hz: f32,

    /// Frames published per second
    pub frame_rate_hz: f32,

    /// Oscillation frequency shared by all channels
    pub frequency_hz: f32,

    /// Phase step between consecutive channels, in radians
    pub phase_lag_rad: f32,

    /// Peak amplitude of the oscillation
    pub amplitude: f32,

    /// Amplitude of uniform additive noise
    pub noise: f32,

    /// Seed for the noise generator; random when unset
    pub seed: Option<u64>,

    /// Maximum time to wait for the producer thread to come up
    pub connect_timeout_ms: u64,
}

impl Default for SyntheticEegConfig {
    fn default() -> Self {
        Self {
            source_id: "eeg".to_string(),
            channels: ["Fz", "Cz", "Pz", "Oz"].iter().map(|s| s.to_string()).collect(),
            sample_rate_hz: 256.0,
            frame_rate_hz: 16.0,
            frequency_hz: 10.0,
            phase_lag_rad: std::f32::consts::FRAC_PI_4,
            amplitude: 1.0,
            noise: 0.2,
            seed: None,
            connect_timeout_ms: 1000,
        }
    }
}

impl SyntheticEegConfig {
    /// Samples per channel in each frame
    pub fn samples_per_frame(&self) -> usize {
        if self.frame_rate_hz <= 0.0 {
            return 0;
        }
        (self.sample_rate_hz / self.frame_rate_hz).round().max(1.0) as usize
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        if self.frame_rate_hz <= 0.0 {
            return Duration::from_secs(1);
        }
        Duration::from_secs_f32(1.0 / self.frame_rate_hz)
    }
}

/// Built-in producers
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Synthetic EEG generator; disabled when absent
    pub synthetic: Option<SyntheticEegConfig>,
}
