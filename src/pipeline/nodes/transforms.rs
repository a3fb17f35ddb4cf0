//! Transform nodes.
//!
//! Stateless transforms recompute from whatever their inputs hold, so a
//! failed upstream is answered with a result derived from its stale
//! output, which downstream still sees as stale. Accumulating transforms (`ema`, `moving_average`) only ingest
//! inputs refreshed in the current tick and report no data otherwise.

use super::{first_input, map_samples, Params};
use crate::analysis::{
    bandpass, design_bandpass, envelope, BiquadSection, NumericError, SpectrumAnalyzer,
    WindowFunction,
};
use crate::pipeline::error::{EvalResult, GraphError, NodeEvaluationError};
use crate::pipeline::node::{EvalContext, Evaluation};
use crate::pipeline::value::{ChannelMap, StateMap, Value};

/// Forwards its first input unchanged
#[derive(Debug, Clone, Copy)]
pub struct PassthroughTransform;

impl PassthroughTransform {
    pub fn evaluate(&mut self, ctx: &EvalContext) -> EvalResult<Evaluation> {
        Ok(Evaluation::output(first_input(ctx)?.value.clone()))
    }
}

/// `x * gain + offset` on scalars, series or channels
#[derive(Debug, Clone, Copy)]
pub struct ScaleTransform {
    gain: f64,
    offset: f64,
}

impl ScaleTransform {
    pub(crate) fn from_params(params: &Params) -> Result<Self, GraphError> {
        Ok(Self {
            gain: params.f64_or("gain", 1.0)?,
            offset: params.f64_or("offset", 0.0)?,
        })
    }

    pub fn evaluate(&mut self, ctx: &EvalContext) -> EvalResult<Evaluation> {
        let input = first_input(ctx)?;
        let output = match &input.value {
            Value::Scalar(v) => Value::Scalar(v * self.gain + self.offset),
            other => {
                let (gain, offset) = (self.gain as f32, self.offset as f32);
                map_samples(other, |s| s.iter().map(|x| x * gain + offset).collect())?
            }
        };
        Ok(Evaluation::output(output))
    }
}

/// Sum of all inputs: scalars add up, series add elementwise
#[derive(Debug, Clone, Copy)]
pub struct SumTransform;

impl SumTransform {
    pub fn evaluate(&mut self, ctx: &EvalContext) -> EvalResult<Evaluation> {
        let first = first_input(ctx)?;
        if ctx.inputs.iter().any(|i| i.value.is_empty()) {
            return Err(NodeEvaluationError::NoData);
        }

        let output = match &first.value {
            Value::Scalar(_) | Value::Bool(_) => {
                let mut total = 0.0;
                for input in ctx.inputs {
                    total += input
                        .value
                        .as_scalar()
                        .ok_or_else(|| NodeEvaluationError::mismatch("scalar", &input.value))?;
                }
                Value::Scalar(total)
            }
            Value::Series(s) => {
                let mut total = s.to_vec();
                for input in &ctx.inputs[1..] {
                    let other = input
                        .value
                        .as_series()
                        .ok_or_else(|| NodeEvaluationError::mismatch("series", &input.value))?;
                    if other.len() != total.len() {
                        return Err(NumericError::LengthMismatch {
                            expected: total.len(),
                            actual: other.len(),
                        }
                        .into());
                    }
                    total.iter_mut().zip(other).for_each(|(t, x)| *t += x);
                }
                Value::series(total)
            }
            other => return Err(NodeEvaluationError::mismatch("scalar or series", other)),
        };
        Ok(Evaluation::output(output))
    }
}

/// `1 / x`, failing when `|x|` is below `epsilon`
#[derive(Debug, Clone, Copy)]
pub struct ReciprocalTransform {
    epsilon: f64,
}

impl ReciprocalTransform {
    pub(crate) fn from_params(params: &Params) -> Result<Self, GraphError> {
        Ok(Self {
            epsilon: params.f64_or("epsilon", 1e-9)?.abs(),
        })
    }

    pub fn evaluate(&mut self, ctx: &EvalContext) -> EvalResult<Evaluation> {
        let input = first_input(ctx)?;
        let x = input
            .value
            .as_scalar()
            .ok_or_else(|| NodeEvaluationError::mismatch("scalar", &input.value))?;
        if !x.is_finite() || x.abs() < self.epsilon {
            return Err(NumericError::NearZero(x).into());
        }
        Ok(Evaluation::output(Value::Scalar(1.0 / x)))
    }
}

/// Exponential moving average of a scalar stream
#[derive(Debug, Clone, Copy)]
pub struct EmaTransform {
    alpha: f64,
}

impl EmaTransform {
    pub(crate) fn from_params(params: &Params) -> Result<Self, GraphError> {
        let alpha = params.f64_or("alpha", 0.15)?;
        if !(0.0..=1.0).contains(&alpha) {
            return Err(params.reject("'alpha' must be within [0, 1]"));
        }
        Ok(Self { alpha })
    }

    pub fn evaluate(&mut self, ctx: &EvalContext) -> EvalResult<Evaluation> {
        let input = first_input(ctx)?;
        if !input.fresh {
            return Err(NodeEvaluationError::NoData);
        }
        let x = input
            .value
            .as_scalar()
            .ok_or_else(|| NodeEvaluationError::mismatch("scalar", &input.value))?;

        let next = match ctx.state.get("ema").and_then(Value::as_scalar) {
            Some(prev) => prev * (1.0 - self.alpha) + x * self.alpha,
            None => x,
        };

        let mut state = StateMap::new();
        state.insert("ema".into(), Value::Scalar(next));
        Ok(Evaluation::with_state(Value::Scalar(next), state))
    }
}

/// Mean of the last `window` scalars
#[derive(Debug, Clone, Copy)]
pub struct MovingAverageTransform {
    window: usize,
}

impl MovingAverageTransform {
    pub(crate) fn from_params(params: &Params) -> Result<Self, GraphError> {
        let window = params.usize_or("window", 8)?;
        if window == 0 {
            return Err(params.reject("'window' must be positive"));
        }
        Ok(Self { window })
    }

    pub fn evaluate(&mut self, ctx: &EvalContext) -> EvalResult<Evaluation> {
        let input = first_input(ctx)?;
        if !input.fresh {
            return Err(NodeEvaluationError::NoData);
        }
        let x = input
            .value
            .as_scalar()
            .ok_or_else(|| NodeEvaluationError::mismatch("scalar", &input.value))?;

        let mut history: Vec<f32> = ctx
            .state
            .get("history")
            .and_then(Value::as_series)
            .map(<[f32]>::to_vec)
            .unwrap_or_default();
        history.push(x as f32);
        if history.len() > self.window {
            history.drain(..history.len() - self.window);
        }
        let mean = history.iter().map(|&v| v as f64).sum::<f64>() / history.len() as f64;

        let mut state = StateMap::new();
        state.insert("history".into(), Value::series(history));
        Ok(Evaluation::with_state(Value::Scalar(mean), state))
    }
}

/// Cascaded biquad band-pass, designed once at construction
#[derive(Debug, Clone)]
pub struct BandpassTransform {
    sections: Vec<BiquadSection>,
}

impl BandpassTransform {
    pub(crate) fn from_params(params: &Params) -> Result<Self, GraphError> {
        let low = params.f64_required("low_hz")?;
        let high = params.f64_required("high_hz")?;
        let fs = params.f64_or("sample_rate_hz", 256.0)?;
        let stages = params.usize_or("stages", 2)?;
        let sections = design_bandpass(low as f32, high as f32, fs as f32, stages)
            .map_err(|e| params.reject(e))?;
        Ok(Self { sections })
    }

    pub fn evaluate(&mut self, ctx: &EvalContext) -> EvalResult<Evaluation> {
        let input = first_input(ctx)?;
        let output = map_samples(&input.value, |s| bandpass(s, &self.sections))?;
        Ok(Evaluation::output(output))
    }
}

/// Hilbert envelope of a series or of every channel
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeTransform;

impl EnvelopeTransform {
    pub fn evaluate(&mut self, ctx: &EvalContext) -> EvalResult<Evaluation> {
        let input = first_input(ctx)?;
        Ok(Evaluation::output(map_samples(&input.value, envelope)?))
    }
}

/// Spectral power inside `[low_hz, high_hz]`.
///
/// A series yields a scalar. Channels yield a channel map holding one
/// value per channel.
pub struct BandPowerTransform {
    low_hz: f64,
    high_hz: f64,
    sample_rate_hz: f64,
    analyzer: SpectrumAnalyzer,
}

impl BandPowerTransform {
    pub(crate) fn from_params(params: &Params) -> Result<Self, GraphError> {
        let low_hz = params.f64_required("low_hz")?;
        let high_hz = params.f64_required("high_hz")?;
        if low_hz >= high_hz {
            return Err(params.reject("'low_hz' must be below 'high_hz'"));
        }
        let sample_rate_hz = params.f64_or("sample_rate_hz", 256.0)?;
        if sample_rate_hz <= 0.0 {
            return Err(params.reject("'sample_rate_hz' must be positive"));
        }
        let window = match params.opt_str("window_fn")? {
            Some(name) => name.parse::<WindowFunction>().map_err(|e| params.reject(e))?,
            None => WindowFunction::Hann,
        };
        Ok(Self {
            low_hz,
            high_hz,
            sample_rate_hz,
            analyzer: SpectrumAnalyzer::new(window),
        })
    }

    fn power(&mut self, samples: &[f32]) -> f64 {
        self.analyzer
            .compute(samples, self.sample_rate_hz)
            .band_power(self.low_hz, self.high_hz)
    }

    pub fn evaluate(&mut self, ctx: &EvalContext) -> EvalResult<Evaluation> {
        let input = first_input(ctx)?;
        let output = match &input.value {
            Value::Series(s) => Value::Scalar(self.power(s)),
            Value::Channels(channels) => {
                let mut powers = ChannelMap::new();
                for (name, samples) in channels.iter() {
                    powers.insert(name.clone(), vec![self.power(samples) as f32]);
                }
                Value::channels(powers)
            }
            other => return Err(NodeEvaluationError::mismatch("series or channels", other)),
        };
        Ok(Evaluation::output(output))
    }
}

/// Combines inputs into one channel map.
///
/// Series inputs become a channel named after their upstream node; channel
/// inputs are merged, later inputs winning on name clashes.
#[derive(Debug, Clone, Copy)]
pub struct MergeChannelsTransform;

impl MergeChannelsTransform {
    pub fn evaluate(&mut self, ctx: &EvalContext) -> EvalResult<Evaluation> {
        if ctx.inputs.is_empty() {
            return Err(NodeEvaluationError::MissingInput(0));
        }

        let mut merged = ChannelMap::new();
        for input in ctx.inputs {
            match &input.value {
                Value::Empty => {}
                Value::Series(s) => {
                    merged.insert(input.source.clone(), s.to_vec());
                }
                Value::Channels(channels) => {
                    merged.extend(channels.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                other => return Err(NodeEvaluationError::mismatch("series or channels", other)),
            }
        }

        if merged.is_empty() {
            return Err(NodeEvaluationError::NoData);
        }
        Ok(Evaluation::output(Value::channels(merged)))
    }
}

/// Extracts `global_sync` from a coherence matrix
#[derive(Debug, Clone, Copy)]
pub struct GlobalSyncTransform;

impl GlobalSyncTransform {
    pub fn evaluate(&mut self, ctx: &EvalContext) -> EvalResult<Evaluation> {
        let input = first_input(ctx)?;
        let matrix = input
            .value
            .as_coherence()
            .ok_or_else(|| NodeEvaluationError::mismatch("coherence", &input.value))?;
        Ok(Evaluation::output(Value::Scalar(matrix.global_sync as f64)))
    }
}
