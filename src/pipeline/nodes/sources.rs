//! Source nodes: values entering the graph.
//!
//! `bus` is the only source fed from outside; the others generate values
//! on their own and are mostly useful for tests and demos.

use super::Params;
use crate::pipeline::bus::{BusFrame, FrameType};
use crate::pipeline::error::{EvalResult, GraphError, NodeEvaluationError};
use crate::pipeline::node::{EvalContext, Evaluation};
use crate::pipeline::value::{StateMap, Value};
use std::f64::consts::TAU;

/// Emits the payload of the newest frame routed to it
#[derive(Debug, Clone)]
pub struct BusSource {
    source_id: String,
    frame_type: Option<FrameType>,
}

impl BusSource {
    pub(crate) fn from_params(params: &Params) -> Result<Self, GraphError> {
        let source_id = params
            .opt_str("source_id")?
            .ok_or_else(|| params.reject("missing 'source_id'"))?
            .to_string();
        let frame_type = params
            .opt_str("frame_type")?
            .map(|s| s.parse::<FrameType>().map_err(|e| params.reject(e)))
            .transpose()?;
        Ok(Self {
            source_id,
            frame_type,
        })
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Whether a frame belongs to this source
    pub fn accepts(&self, frame: &BusFrame) -> bool {
        frame.source_id == self.source_id
            && self.frame_type.map_or(true, |t| t == frame.frame_type)
    }

    pub fn evaluate(&mut self, ctx: &EvalContext) -> EvalResult<Evaluation> {
        let frame = ctx.frame.ok_or(NodeEvaluationError::NoData)?;
        Ok(Evaluation::output(frame.payload.to_value()))
    }
}

/// Emits the same value every tick
#[derive(Debug, Clone)]
pub struct ConstantSource {
    value: Value,
}

impl ConstantSource {
    pub(crate) fn from_params(params: &Params) -> Result<Self, GraphError> {
        let value = params
            .get("value")
            .ok_or_else(|| params.reject("missing 'value'"))?
            .to_value()
            .ok_or_else(|| params.reject("'value' list must be numeric"))?;
        Ok(Self { value })
    }

    pub fn evaluate(&mut self, _ctx: &EvalContext) -> EvalResult<Evaluation> {
        Ok(Evaluation::output(self.value.clone()))
    }
}

/// Emits one scalar per tick from a fixed list
#[derive(Debug, Clone)]
pub struct SequenceSource {
    values: Vec<f64>,
    repeat: bool,
}

impl SequenceSource {
    pub(crate) fn from_params(params: &Params) -> Result<Self, GraphError> {
        let values = params.f64_list("values")?;
        if values.is_empty() {
            return Err(params.reject("'values' must not be empty"));
        }
        Ok(Self {
            values,
            repeat: params.bool_or("repeat", false)?,
        })
    }

    pub fn evaluate(&mut self, ctx: &EvalContext) -> EvalResult<Evaluation> {
        let mut index = state_index(ctx.state, "index");
        if index >= self.values.len() {
            if !self.repeat {
                return Err(NodeEvaluationError::NoData);
            }
            index %= self.values.len();
        }

        let mut state = StateMap::new();
        state.insert("index".into(), Value::Scalar((index + 1) as f64));
        Ok(Evaluation::with_state(
            Value::Scalar(self.values[index]),
            state,
        ))
    }
}

/// Sine generator emitting a block of samples per tick
#[derive(Debug, Clone)]
pub struct OscillatorSource {
    frequency_hz: f64,
    amplitude: f64,
    sample_rate_hz: f64,
    samples_per_tick: usize,
    phase: f64,
}

impl OscillatorSource {
    pub(crate) fn from_params(params: &Params) -> Result<Self, GraphError> {
        let sample_rate_hz = params.f64_or("sample_rate_hz", 256.0)?;
        if sample_rate_hz <= 0.0 {
            return Err(params.reject("'sample_rate_hz' must be positive"));
        }
        let samples_per_tick = params.usize_or("samples_per_tick", 16)?;
        if samples_per_tick == 0 {
            return Err(params.reject("'samples_per_tick' must be positive"));
        }
        Ok(Self {
            frequency_hz: params.f64_required("frequency_hz")?,
            amplitude: params.f64_or("amplitude", 1.0)?,
            sample_rate_hz,
            samples_per_tick,
            phase: params.f64_or("phase", 0.0)?,
        })
    }

    pub fn evaluate(&mut self, ctx: &EvalContext) -> EvalResult<Evaluation> {
        let start = state_index(ctx.state, "sample_index");
        let step = TAU * self.frequency_hz / self.sample_rate_hz;
        let samples = (start..start + self.samples_per_tick)
            .map(|n| (self.amplitude * (step * n as f64 + self.phase).sin()) as f32)
            .collect();

        let mut state = StateMap::new();
        state.insert(
            "sample_index".into(),
            Value::Scalar((start + self.samples_per_tick) as f64),
        );
        Ok(Evaluation::with_state(Value::series(samples), state))
    }
}

fn state_index(state: &StateMap, key: &str) -> usize {
    state
        .get(key)
        .and_then(Value::as_scalar)
        .filter(|v| *v >= 0.0)
        .map(|v| v as usize)
        .unwrap_or(0)
}
