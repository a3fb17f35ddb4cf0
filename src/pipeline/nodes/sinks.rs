//! Sink nodes: the only place results leave the graph.
//!
//! Sinks act on input refreshed in the current tick, so a stalled upstream
//! is not re-published every tick.

use super::{first_input, Params};
use crate::pipeline::bus::{BusFrame, FramePayload, FrameType};
use crate::pipeline::error::{EvalResult, GraphError, NodeEvaluationError};
use crate::pipeline::node::{EvalContext, Evaluation, NodeInput};
use crate::pipeline::value::{StateMap, Value};

/// Publishes its first input on the bus
#[derive(Debug, Clone)]
pub struct PublishSink {
    source_id: String,
    frame_type: FrameType,
    confidence: f32,
}

impl PublishSink {
    pub(crate) fn from_params(params: &Params) -> Result<Self, GraphError> {
        let source_id = params.opt_str("source_id")?.unwrap_or(params.id()).to_string();
        let frame_type = match params.opt_str("frame_type")? {
            Some(name) => name.parse::<FrameType>().map_err(|e| params.reject(e))?,
            None => FrameType::System,
        };
        Ok(Self {
            source_id,
            frame_type,
            confidence: params.f64_or("confidence", 1.0)? as f32,
        })
    }

    pub fn evaluate(&mut self, ctx: &EvalContext) -> EvalResult<Evaluation> {
        let input = fresh_input(ctx)?;
        let bus = ctx
            .bus
            .ok_or_else(|| NodeEvaluationError::Config("sink has no bus handle".into()))?;

        let frame = BusFrame::new(
            ctx.now_ms,
            self.source_id.clone(),
            self.frame_type,
            FramePayload::from_value(&input.value),
        )
        .with_confidence(self.confidence);
        bus.publish(frame);

        let published = ctx
            .state
            .get("published")
            .and_then(Value::as_scalar)
            .unwrap_or(0.0)
            + 1.0;
        let mut state = StateMap::new();
        state.insert("published".into(), Value::Scalar(published));
        Ok(Evaluation::with_state(input.value.clone(), state))
    }
}

/// Logs a summary of its first input
#[derive(Debug, Clone, Copy)]
pub struct LogSink;

impl LogSink {
    pub fn evaluate(&mut self, ctx: &EvalContext) -> EvalResult<Evaluation> {
        let input = fresh_input(ctx)?;
        tracing::info!(
            node = ctx.node_id,
            tick = ctx.tick,
            from = %input.source,
            "{}",
            summarize(&input.value)
        );
        Ok(Evaluation::output(input.value.clone()))
    }
}

fn fresh_input<'a>(ctx: &'a EvalContext) -> EvalResult<&'a NodeInput> {
    let input = first_input(ctx)?;
    if !input.fresh {
        return Err(NodeEvaluationError::NoData);
    }
    Ok(input)
}

/// One-line description of a value for logs
pub(crate) fn summarize(value: &Value) -> String {
    match value {
        Value::Empty => "empty".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Scalar(v) => format!("{:.4}", v),
        Value::Text(t) => t.clone(),
        Value::Series(s) => format!("series[{}]", s.len()),
        Value::Channels(c) => format!(
            "channels[{}]",
            c.keys().map(String::as_str).collect::<Vec<_>>().join(",")
        ),
        Value::Coherence(m) => format!(
            "coherence pairs={} global_sync={:.3} engine={}",
            m.len(),
            m.global_sync,
            m.engine
        ),
    }
}
