//! Node definitions and behavior dispatch.
//!
//! - **`NodeDef` / `GraphDef`**: the serializable description of a graph.
//! - **`Behavior` enum**: the fixed catalogue of node operations, dispatched
//!   by `match`.
//! - **`EvalContext`**: what a node sees for one evaluation: its inputs in
//!   declaration order, its config and state, the clock, and (for sinks only)
//!   the bus.

use crate::coherence::ComputeTier;
use crate::pipeline::bus::{BusFrame, BusHandle};
use crate::pipeline::error::EvalResult;
use crate::pipeline::nodes::{
    BandPowerTransform, BandpassTransform, BusSource, CoherenceNode, ConstantSource, EmaTransform,
    EnvelopeTransform, GlobalSyncTransform, LogSink, MergeChannelsTransform,
    MovingAverageTransform, OscillatorSource, PassthroughTransform, PublishSink,
    ReciprocalTransform, ScaleTransform, SequenceSource, SumTransform,
};
use crate::pipeline::value::{ConfigMap, ConfigValue, StateMap, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a node in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    #[serde(alias = "Source")]
    Source,
    #[serde(alias = "Transform")]
    Transform,
    #[serde(alias = "Sink")]
    Sink,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Source => "source",
            NodeKind::Transform => "transform",
            NodeKind::Sink => "sink",
        }
    }

    /// Operation used when the config has no `op` key
    pub fn default_op(&self) -> &'static str {
        match self {
            NodeKind::Source => "bus",
            NodeKind::Transform => "passthrough",
            NodeKind::Sink => "publish",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable node description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
    pub id: String,
    pub kind: NodeKind,
    /// Upstream node ids; order is the positional argument order
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub config: ConfigMap,
}

impl NodeDef {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            inputs: Vec::new(),
            config: ConfigMap::new(),
        }
    }

    pub fn source(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Source)
    }

    pub fn transform(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Transform)
    }

    pub fn sink(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Sink)
    }

    /// Set the `op` config key
    pub fn op(self, op: &str) -> Self {
        self.with("op", op)
    }

    pub fn with(mut self, key: &str, value: impl Into<ConfigValue>) -> Self {
        self.config.insert(key.to_string(), value.into());
        self
    }

    pub fn input(mut self, upstream: impl Into<String>) -> Self {
        self.inputs.push(upstream.into());
        self
    }

    /// Operation selected by the config
    pub fn op_name(&self) -> &str {
        self.config
            .get("op")
            .and_then(ConfigValue::as_str)
            .unwrap_or_else(|| self.kind.default_op())
    }
}

/// Serializable graph description
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphDef {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub nodes: Vec<NodeDef>,
}

impl GraphDef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nodes: Vec::new(),
        }
    }

    pub fn node(mut self, node: NodeDef) -> Self {
        self.nodes.push(node);
        self
    }
}

/// One positional input for an evaluation
#[derive(Debug, Clone)]
pub struct NodeInput {
    /// Upstream node id
    pub source: String,
    /// Upstream `last_output`, possibly from an earlier tick
    pub value: Value,
    /// Whether the upstream node succeeded in the current tick
    pub fresh: bool,
}

/// Everything a node sees for one evaluation
pub struct EvalContext<'a> {
    pub node_id: &'a str,
    pub inputs: &'a [NodeInput],
    pub config: &'a ConfigMap,
    pub state: &'a StateMap,
    /// Clock time of the tick, in milliseconds
    pub now_ms: u64,
    pub tick: u64,
    /// Newest routed frame since the previous evaluation (bus sources only)
    pub frame: Option<&'a BusFrame>,
    /// Publishing capability (sinks only)
    pub bus: Option<&'a BusHandle>,
}

/// Result of a successful evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub output: Value,
    /// Replacement state; `None` keeps the current state
    pub state: Option<StateMap>,
    /// Whether downstream sees this output as new data. `None` derives it
    /// from the inputs: sources are fresh on success, everything else only
    /// when at least one input was fresh.
    pub fresh: Option<bool>,
}

impl Evaluation {
    pub fn output(output: Value) -> Self {
        Self {
            output,
            state: None,
            fresh: None,
        }
    }

    pub fn with_state(output: Value, state: StateMap) -> Self {
        Self {
            output,
            state: Some(state),
            fresh: None,
        }
    }

    /// Mark the output as new data even if every input was stale
    pub fn refreshed(mut self) -> Self {
        self.fresh = Some(true);
        self
    }
}

/// The fixed catalogue of node operations
pub enum Behavior {
    BusSource(BusSource),
    Constant(ConstantSource),
    Sequence(SequenceSource),
    Oscillator(OscillatorSource),
    Passthrough(PassthroughTransform),
    Scale(ScaleTransform),
    Sum(SumTransform),
    Reciprocal(ReciprocalTransform),
    Ema(EmaTransform),
    MovingAverage(MovingAverageTransform),
    Bandpass(BandpassTransform),
    Envelope(EnvelopeTransform),
    BandPower(BandPowerTransform),
    MergeChannels(MergeChannelsTransform),
    Coherence(Box<CoherenceNode>),
    GlobalSync(GlobalSyncTransform),
    Publish(PublishSink),
    Log(LogSink),
}

impl Behavior {
    pub fn op(&self) -> &'static str {
        match self {
            Behavior::BusSource(_) => "bus",
            Behavior::Constant(_) => "constant",
            Behavior::Sequence(_) => "sequence",
            Behavior::Oscillator(_) => "oscillator",
            Behavior::Passthrough(_) => "passthrough",
            Behavior::Scale(_) => "scale",
            Behavior::Sum(_) => "sum",
            Behavior::Reciprocal(_) => "reciprocal",
            Behavior::Ema(_) => "ema",
            Behavior::MovingAverage(_) => "moving_average",
            Behavior::Bandpass(_) => "bandpass",
            Behavior::Envelope(_) => "envelope",
            Behavior::BandPower(_) => "band_power",
            Behavior::MergeChannels(_) => "merge_channels",
            Behavior::Coherence(_) => "coherence",
            Behavior::GlobalSync(_) => "global_sync",
            Behavior::Publish(_) => "publish",
            Behavior::Log(_) => "log",
        }
    }

    pub fn evaluate(&mut self, ctx: &EvalContext) -> EvalResult<Evaluation> {
        match self {
            Behavior::BusSource(n) => n.evaluate(ctx),
            Behavior::Constant(n) => n.evaluate(ctx),
            Behavior::Sequence(n) => n.evaluate(ctx),
            Behavior::Oscillator(n) => n.evaluate(ctx),
            Behavior::Passthrough(n) => n.evaluate(ctx),
            Behavior::Scale(n) => n.evaluate(ctx),
            Behavior::Sum(n) => n.evaluate(ctx),
            Behavior::Reciprocal(n) => n.evaluate(ctx),
            Behavior::Ema(n) => n.evaluate(ctx),
            Behavior::MovingAverage(n) => n.evaluate(ctx),
            Behavior::Bandpass(n) => n.evaluate(ctx),
            Behavior::Envelope(n) => n.evaluate(ctx),
            Behavior::BandPower(n) => n.evaluate(ctx),
            Behavior::MergeChannels(n) => n.evaluate(ctx),
            Behavior::Coherence(n) => n.evaluate(ctx),
            Behavior::GlobalSync(n) => n.evaluate(ctx),
            Behavior::Publish(n) => n.evaluate(ctx),
            Behavior::Log(n) => n.evaluate(ctx),
        }
    }

    /// Whether a routed bus frame belongs to this node's latest-frame slot
    pub fn accepts_frame(&self, frame: &BusFrame) -> bool {
        match self {
            Behavior::BusSource(n) => n.accepts(frame),
            _ => false,
        }
    }

    /// Tier of the last coherence computation, for coherence nodes
    pub fn coherence_tier(&self) -> Option<ComputeTier> {
        match self {
            Behavior::Coherence(n) => Some(n.tier()),
            _ => None,
        }
    }
}

impl fmt::Debug for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Behavior").field(&self.op()).finish()
    }
}
