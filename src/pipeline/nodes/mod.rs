//! Built-in node implementations and the factory that builds them from a
//! [`NodeDef`].
//!
//! | Kind      | `op`                                                        |
//! |-----------|-------------------------------------------------------------|
//! | source    | **bus**, constant, sequence, oscillator                     |
//! | transform | **passthrough**, scale, sum, reciprocal, ema, moving_average, bandpass, envelope, band_power, merge_channels, coherence, global_sync |
//! | sink      | **publish**, log                                            |
//!
//! Bold entries are the defaults when `op` is absent.

pub mod coherence_node;
pub mod sinks;
pub mod sources;
pub mod transforms;

pub use coherence_node::CoherenceNode;
pub use sinks::{LogSink, PublishSink};
pub use sources::{BusSource, ConstantSource, OscillatorSource, SequenceSource};
pub use transforms::{
    BandPowerTransform, BandpassTransform, EmaTransform, EnvelopeTransform, GlobalSyncTransform,
    MergeChannelsTransform, MovingAverageTransform, PassthroughTransform, ReciprocalTransform,
    ScaleTransform, SumTransform,
};

use crate::coherence::{default_backend_factory, BackendFactory, TierGate};
use crate::config::CoherenceConfig;
use crate::pipeline::error::{EvalResult, GraphError, NodeEvaluationError};
use crate::pipeline::node::{Behavior, EvalContext, NodeDef, NodeInput, NodeKind};
use crate::pipeline::value::{ConfigMap, ConfigValue, Value};
use std::sync::Arc;

/// Builds behaviors from node definitions.
///
/// Coherence nodes take their defaults from the engine's `[coherence]`
/// config and share the engine's tier gate.
#[derive(Clone)]
pub struct NodeFactory {
    coherence: CoherenceConfig,
    tier_gate: Arc<TierGate>,
    backend_factory: BackendFactory,
}

impl NodeFactory {
    pub fn new(coherence: CoherenceConfig, tier_gate: Arc<TierGate>) -> Self {
        Self {
            coherence,
            tier_gate,
            backend_factory: default_backend_factory(),
        }
    }

    /// Replace the accelerator constructor handed to coherence nodes
    pub fn with_backend_factory(mut self, factory: BackendFactory) -> Self {
        self.backend_factory = factory;
        self
    }

    pub fn coherence_defaults(&self) -> &CoherenceConfig {
        &self.coherence
    }

    pub fn tier_gate(&self) -> &Arc<TierGate> {
        &self.tier_gate
    }

    /// Build the behavior for `def`, or `InvalidNode` if the kind, op or
    /// config is not usable.
    pub fn build(&self, def: &NodeDef) -> Result<Behavior, GraphError> {
        let params = Params::new(&def.id, &def.config);
        if let Some(op) = def.config.get("op") {
            if op.as_str().is_none() {
                return Err(GraphError::invalid(&def.id, "'op' must be a string"));
            }
        }

        let op = def.op_name();
        let behavior = match (def.kind, op) {
            (NodeKind::Source, "bus") => Behavior::BusSource(BusSource::from_params(&params)?),
            (NodeKind::Source, "constant") => {
                Behavior::Constant(ConstantSource::from_params(&params)?)
            }
            (NodeKind::Source, "sequence") => {
                Behavior::Sequence(SequenceSource::from_params(&params)?)
            }
            (NodeKind::Source, "oscillator") => {
                Behavior::Oscillator(OscillatorSource::from_params(&params)?)
            }
            (NodeKind::Transform, "passthrough") => Behavior::Passthrough(PassthroughTransform),
            (NodeKind::Transform, "scale") => Behavior::Scale(ScaleTransform::from_params(&params)?),
            (NodeKind::Transform, "sum") => Behavior::Sum(SumTransform),
            (NodeKind::Transform, "reciprocal") => {
                Behavior::Reciprocal(ReciprocalTransform::from_params(&params)?)
            }
            (NodeKind::Transform, "ema") => Behavior::Ema(EmaTransform::from_params(&params)?),
            (NodeKind::Transform, "moving_average") => {
                Behavior::MovingAverage(MovingAverageTransform::from_params(&params)?)
            }
            (NodeKind::Transform, "bandpass") => {
                Behavior::Bandpass(BandpassTransform::from_params(&params)?)
            }
            (NodeKind::Transform, "envelope") => Behavior::Envelope(EnvelopeTransform),
            (NodeKind::Transform, "band_power") => {
                Behavior::BandPower(BandPowerTransform::from_params(&params)?)
            }
            (NodeKind::Transform, "merge_channels") => {
                Behavior::MergeChannels(MergeChannelsTransform)
            }
            (NodeKind::Transform, "coherence") => Behavior::Coherence(Box::new(
                CoherenceNode::from_params(
                    &params,
                    &self.coherence,
                    Arc::clone(&self.tier_gate),
                    Arc::clone(&self.backend_factory),
                )?,
            )),
            (NodeKind::Transform, "global_sync") => Behavior::GlobalSync(GlobalSyncTransform),
            (NodeKind::Sink, "publish") => Behavior::Publish(PublishSink::from_params(&params)?),
            (NodeKind::Sink, "log") => Behavior::Log(LogSink),
            (kind, op) => {
                return Err(GraphError::invalid(
                    &def.id,
                    format!("unknown {} op '{}'", kind, op),
                ))
            }
        };
        Ok(behavior)
    }
}

/// Typed access to a node's config map
pub(crate) struct Params<'a> {
    id: &'a str,
    config: &'a ConfigMap,
}

impl<'a> Params<'a> {
    pub(crate) fn new(id: &'a str, config: &'a ConfigMap) -> Self {
        Self { id, config }
    }

    pub(crate) fn id(&self) -> &'a str {
        self.id
    }

    fn invalid(&self, reason: String) -> GraphError {
        GraphError::invalid(self.id, reason)
    }

    pub(crate) fn get(&self, key: &str) -> Option<&'a ConfigValue> {
        self.config.get(key)
    }

    pub(crate) fn opt_f64(&self, key: &str) -> Result<Option<f64>, GraphError> {
        match self.config.get(key) {
            None => Ok(None),
            Some(v) => v
                .as_float()
                .filter(|f| f.is_finite())
                .map(Some)
                .ok_or_else(|| self.invalid(format!("'{}' must be a finite number", key))),
        }
    }

    pub(crate) fn f64_or(&self, key: &str, default: f64) -> Result<f64, GraphError> {
        Ok(self.opt_f64(key)?.unwrap_or(default))
    }

    pub(crate) fn f64_required(&self, key: &str) -> Result<f64, GraphError> {
        self.opt_f64(key)?
            .ok_or_else(|| self.invalid(format!("missing '{}'", key)))
    }

    pub(crate) fn opt_usize(&self, key: &str) -> Result<Option<usize>, GraphError> {
        match self.config.get(key) {
            None => Ok(None),
            Some(v) => v
                .as_int()
                .filter(|i| *i >= 0)
                .map(|i| Some(i as usize))
                .ok_or_else(|| self.invalid(format!("'{}' must be a non-negative integer", key))),
        }
    }

    pub(crate) fn usize_or(&self, key: &str, default: usize) -> Result<usize, GraphError> {
        Ok(self.opt_usize(key)?.unwrap_or(default))
    }

    pub(crate) fn opt_bool(&self, key: &str) -> Result<Option<bool>, GraphError> {
        match self.config.get(key) {
            None => Ok(None),
            Some(v) => v
                .as_bool()
                .map(Some)
                .ok_or_else(|| self.invalid(format!("'{}' must be a boolean", key))),
        }
    }

    pub(crate) fn bool_or(&self, key: &str, default: bool) -> Result<bool, GraphError> {
        Ok(self.opt_bool(key)?.unwrap_or(default))
    }

    pub(crate) fn opt_str(&self, key: &str) -> Result<Option<&'a str>, GraphError> {
        match self.config.get(key) {
            None => Ok(None),
            Some(v) => v
                .as_str()
                .map(Some)
                .ok_or_else(|| self.invalid(format!("'{}' must be a string", key))),
        }
    }

    pub(crate) fn f64_list(&self, key: &str) -> Result<Vec<f64>, GraphError> {
        let list = self
            .config
            .get(key)
            .and_then(ConfigValue::as_list)
            .ok_or_else(|| self.invalid(format!("'{}' must be a list of numbers", key)))?;
        list.iter()
            .map(|v| v.as_float())
            .collect::<Option<Vec<f64>>>()
            .ok_or_else(|| self.invalid(format!("'{}' must be a list of numbers", key)))
    }

    /// Wrap a constructor failure into `InvalidNode`
    pub(crate) fn reject(&self, reason: impl std::fmt::Display) -> GraphError {
        self.invalid(reason.to_string())
    }
}

/// First positional input carrying a value.
///
/// No inputs is a wiring error; an upstream that has never produced
/// anything means there is nothing to do yet.
pub(crate) fn first_input<'a>(ctx: &'a EvalContext) -> EvalResult<&'a NodeInput> {
    let input = ctx
        .inputs
        .first()
        .ok_or(NodeEvaluationError::MissingInput(0))?;
    if input.value.is_empty() {
        return Err(NodeEvaluationError::NoData);
    }
    Ok(input)
}

/// Apply `f` to a series or to every channel of a channel map
pub(crate) fn map_samples<F>(value: &Value, f: F) -> EvalResult<Value>
where
    F: Fn(&[f32]) -> Vec<f32>,
{
    match value {
        Value::Series(samples) => Ok(Value::series(f(samples))),
        Value::Channels(channels) => Ok(Value::channels(
            channels
                .iter()
                .map(|(name, samples)| (name.clone(), f(samples)))
                .collect(),
        )),
        other => Err(NodeEvaluationError::mismatch("series or channels", other)),
    }
}
