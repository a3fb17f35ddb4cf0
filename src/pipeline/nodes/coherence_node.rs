//! Coherence transform: windows incoming channels and emits a smoothed
//! ciPLV matrix.
//!
//! Inputs may be series (one channel named after the upstream node) or
//! channel maps. Only inputs refreshed in the current tick are appended to
//! the windows, so a stalled producer ages out instead of being re-counted.

use super::Params;
use crate::coherence::{
    is_valid_channel_name, BackendFactory, ChannelAggregator, CoherenceMatrix, CoherencePipeline, ComputeTier, TierGate,
};
use crate::config::CoherenceConfig;
use crate::pipeline::error::{EvalResult, GraphError, NodeEvaluationError};
use crate::pipeline::node::{EvalContext, Evaluation};
use crate::pipeline::value::{StateMap, Value};
use std::sync::Arc;

pub struct CoherenceNode {
    aggregator: ChannelAggregator,
    pipeline: CoherencePipeline,
    last: Option<Arc<CoherenceMatrix>>,
}

impl CoherenceNode {
    pub fn new(
        config: CoherenceConfig,
        gate: Arc<TierGate>,
        factory: BackendFactory,
    ) -> Result<Self, crate::analysis::NumericError> {
        let aggregator = ChannelAggregator::new(config.window_size, config.decay_ms);
        let pipeline = CoherencePipeline::new(config)?
            .with_tier_gate(gate)
            .with_backend_factory(factory);
        Ok(Self {
            aggregator,
            pipeline,
            last: None,
        })
    }

    /// Engine defaults overridden by the node's own config keys
    pub(crate) fn from_params(
        params: &Params,
        defaults: &CoherenceConfig,
        gate: Arc<TierGate>,
        factory: BackendFactory,
    ) -> Result<Self, GraphError> {
        let mut config = defaults.clone();
        if let Some(v) = params.opt_usize("window_size")? {
            if v == 0 {
                return Err(params.reject("'window_size' must be positive"));
            }
            config.window_size = v;
        }
        if let Some(v) = params.opt_usize("decay_ms")? {
            config.decay_ms = v as u64;
        }
        if let Some(v) = params.opt_f64("alpha")? {
            if !(0.0..=1.0).contains(&v) {
                return Err(params.reject("'alpha' must be within [0, 1]"));
            }
            config.smoothing_alpha = v as f32;
        }
        if let Some(v) = params.opt_f64("band_low_hz")? {
            config.band_low_hz = v as f32;
        }
        if let Some(v) = params.opt_f64("band_high_hz")? {
            config.band_high_hz = v as f32;
        }
        if let Some(v) = params.opt_f64("sample_rate_hz")? {
            config.sample_rate_hz = v as f32;
        }
        if let Some(v) = params.opt_usize("stages")? {
            config.filter_stages = v;
        }
        if let Some(v) = params.opt_bool("prefer_gpu")? {
            config.prefer_gpu = v;
        }

        Self::new(config, gate, factory).map_err(|e| params.reject(e))
    }

    /// Tier that produced the latest matrix
    pub fn tier(&self) -> ComputeTier {
        self.pipeline.tier()
    }

    pub fn aggregator(&self) -> &ChannelAggregator {
        &self.aggregator
    }

    pub fn evaluate(&mut self, ctx: &EvalContext) -> EvalResult<Evaluation> {
        if ctx.inputs.is_empty() {
            return Err(NodeEvaluationError::MissingInput(0));
        }

        // Type-check everything before touching the windows
        for input in ctx.inputs.iter().filter(|i| i.fresh) {
            match &input.value {
                Value::Empty | Value::Series(_) | Value::Channels(_) => {}
                other => return Err(NodeEvaluationError::mismatch("series or channels", other)),
            }
        }

        // Ingest into a copy so a failure leaves the windows as they were
        let mut staged = self.aggregator.clone();
        let mut ingested = false;
        for input in ctx.inputs.iter().filter(|i| i.fresh) {
            match &input.value {
                Value::Series(samples) => {
                    stage(&mut staged, &input.source, samples, ctx.now_ms)?;
                    ingested = true;
                }
                Value::Channels(channels) => {
                    for (name, samples) in channels.iter() {
                        stage(&mut staged, name, samples, ctx.now_ms)?;
                        ingested = true;
                    }
                }
                _ => {}
            }
        }

        let pruned = staged.prune(ctx.now_ms);
        if !ingested && pruned.is_empty() {
            return match &self.last {
                Some(matrix) => Ok(Evaluation::output(Value::Coherence(Arc::clone(matrix)))),
                None => Err(NodeEvaluationError::NoData),
            };
        }

        let ready = staged.ready_channels();
        let matrix = Arc::new(self.pipeline.compute(&ready));
        self.aggregator = staged;
        tracing::trace!(
            node = ctx.node_id,
            channels = self.aggregator.len(),
            ready = ready.len(),
            global_sync = matrix.global_sync,
            "coherence updated"
        );
        self.last = Some(Arc::clone(&matrix));

        let mut state = StateMap::new();
        state.insert(
            "channels".into(),
            Value::Scalar(self.aggregator.len() as f64),
        );
        state.insert("ready".into(), Value::Scalar(ready.len() as f64));
        state.insert("tier".into(), Value::Text(matrix.engine.to_string()));
        // A prune changes the matrix even when every input was stale
        Ok(Evaluation::with_state(Value::Coherence(matrix), state).refreshed())
    }
}

fn stage(
    aggregator: &mut ChannelAggregator,
    name: &str,
    samples: &[f32],
    now_ms: u64,
) -> EvalResult<()> {
    if !is_valid_channel_name(name) {
        return Err(NodeEvaluationError::InvalidChannel(name.to_string()));
    }
    aggregator.push(name, samples, now_ms);
    Ok(())
}
