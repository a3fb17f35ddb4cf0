//! Tiered ciPLV coherence pipeline
//!
//! Per call:
//! 1. band-pass every channel (CPU, fresh filter state),
//! 2. raw pairwise ciPLV on the accelerated tier if the session allows it,
//!    otherwise on the CPU tier,
//! 3. exponential smoothing against the previous matrix and `global_sync`.
//!
//! A [`TierFailure`] demotes the shared [`TierGate`] and the call is answered
//! by the CPU tier, so no tick ever goes without a matrix.

use super::backend::{
    default_backend_factory, pair_indices, BackendFactory, CoherenceBackend, CpuBackend,
    KernelParams,
};
use super::matrix::{is_valid_channel_name, pair_key, CoherenceMatrix, ComputeTier};
use super::tier::{TierFailure, TierGate};
use crate::analysis::{bandpass, design_bandpass, BiquadSection, NumericError};
use crate::config::CoherenceConfig;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

pub struct CoherencePipeline {
    config: CoherenceConfig,
    sections: Vec<BiquadSection>,
    params: KernelParams,
    cpu: CpuBackend,
    accelerator: Option<Box<dyn CoherenceBackend>>,
    /// Gate epoch of the last accelerator construction attempt
    attempted_epoch: Option<u64>,
    factory: BackendFactory,
    gate: Arc<TierGate>,
    smoothed: BTreeMap<String, f32>,
    last_tier: ComputeTier,
}

impl CoherencePipeline {
    /// Build a pipeline with its own tier gate and the build's default accelerator
    pub fn new(config: CoherenceConfig) -> Result<Self, NumericError> {
        let sections = design_bandpass(
            config.band_low_hz,
            config.band_high_hz,
            config.sample_rate_hz,
            config.filter_stages,
        )?;
        Ok(Self {
            params: config.kernel_params(),
            config,
            sections,
            cpu: CpuBackend::new(),
            accelerator: None,
            attempted_epoch: None,
            factory: default_backend_factory(),
            gate: Arc::new(TierGate::new()),
            smoothed: BTreeMap::new(),
            last_tier: ComputeTier::Cpu,
        })
    }

    /// Replace the accelerator constructor
    pub fn with_backend_factory(mut self, factory: BackendFactory) -> Self {
        self.factory = factory;
        self.accelerator = None;
        self.attempted_epoch = None;
        self
    }

    /// Share a session-wide tier gate
    pub fn with_tier_gate(mut self, gate: Arc<TierGate>) -> Self {
        self.gate = gate;
        self.accelerator = None;
        self.attempted_epoch = None;
        self
    }

    pub fn config(&self) -> &CoherenceConfig {
        &self.config
    }

    pub fn tier_gate(&self) -> &Arc<TierGate> {
        &self.gate
    }

    /// Tier that produced the most recent matrix
    pub fn tier(&self) -> ComputeTier {
        self.last_tier
    }

    /// Forget smoothing history
    pub fn reset(&mut self) {
        self.smoothed.clear();
    }

    /// Smoothed coherence matrix for `channels`.
    ///
    /// Fewer than two channels yields an empty matrix. Pairs that were present
    /// in the previous call but not in this one are forgotten. Channels whose
    /// name contains [`PAIR_SEPARATOR`](super::PAIR_SEPARATOR) are skipped.
    pub fn compute(&mut self, channels: &BTreeMap<String, Vec<f32>>) -> CoherenceMatrix {
        let (valid, skipped): (Vec<_>, Vec<_>) = channels
            .iter()
            .partition(|(name, _)| is_valid_channel_name(name));
        for (name, _) in &skipped {
            tracing::warn!(channel = %name, "skipping channel with ambiguous name");
        }

        if valid.len() < 2 {
            self.smoothed.clear();
            return CoherenceMatrix::empty(self.last_tier);
        }

        let names: Vec<&str> = valid.iter().map(|(name, _)| name.as_str()).collect();
        let filtered: Vec<Vec<f32>> = valid
            .iter()
            .map(|(_, samples)| bandpass(samples, &self.sections))
            .collect();

        let (raw, tier) = self.raw_values(&filtered);
        self.last_tier = tier;

        let alpha = self.config.smoothing_alpha.clamp(0.0, 1.0);
        let mut matrix = BTreeMap::new();
        for ((i, j), value) in pair_indices(names.len()).into_iter().zip(raw) {
            let key = pair_key(names[i], names[j]);
            let next = match self.smoothed.get(&key) {
                Some(prev) => prev * (1.0 - alpha) + value * alpha,
                None => value,
            };
            matrix.insert(key, next.clamp(0.0, 1.0));
        }
        self.smoothed = matrix.clone();

        let global_sync = if matrix.is_empty() {
            0.0
        } else {
            matrix.values().sum::<f32>() / matrix.len() as f32
        };

        CoherenceMatrix {
            matrix,
            global_sync,
            engine: tier,
        }
    }

    fn raw_values(&mut self, filtered: &[Vec<f32>]) -> (Vec<f32>, ComputeTier) {
        let expected = pair_indices(filtered.len()).len();

        if self.ensure_accelerator() {
            if let Some(backend) = self.accelerator.as_mut() {
                let params = self.params;
                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(|| backend.pairwise(filtered, &params)));
                let failure = match outcome {
                    Ok(Ok(values)) if values.len() == expected => {
                        return (values, backend.tier());
                    }
                    Ok(Ok(values)) => TierFailure::Runtime(format!(
                        "expected {} pair values, got {}",
                        expected,
                        values.len()
                    )),
                    Ok(Err(failure)) => failure,
                    Err(_) => TierFailure::Runtime("backend panicked".to_string()),
                };
                self.gate.demote(&failure);
                self.accelerator = None;
            }
        }

        (self.cpu.compute(filtered, &self.params), ComputeTier::Cpu)
    }

    /// Make sure an accelerator exists if the session still allows one.
    fn ensure_accelerator(&mut self) -> bool {
        if !self.config.prefer_gpu || !self.gate.is_available() {
            self.accelerator = None;
            return false;
        }
        if self.accelerator.is_some() {
            return true;
        }

        let epoch = self.gate.epoch();
        if self.attempted_epoch == Some(epoch) {
            return false;
        }
        self.attempted_epoch = Some(epoch);

        let factory = Arc::clone(&self.factory);
        let created = panic::catch_unwind(AssertUnwindSafe(|| factory()))
            .unwrap_or_else(|_| Err(TierFailure::Init("backend constructor panicked".to_string())));
        match created {
            Ok(backend) => {
                tracing::info!(backend = backend.backend_name(), "coherence accelerator ready");
                self.accelerator = Some(backend);
                true
            }
            Err(failure) => {
                self.gate.demote(&failure);
                false
            }
        }
    }
}
