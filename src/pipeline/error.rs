//! Engine-specific error types.

use crate::analysis::NumericError;
use thiserror::Error;

/// Graph construction errors. Every operation that returns one leaves the
/// graph exactly as it was.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Node '{0}' already exists")]
    DuplicateId(String),

    #[error("Unknown upstream node '{0}'")]
    UnknownUpstream(String),

    #[error("Unknown node '{0}'")]
    UnknownNode(String),

    #[error("Cycle detected through node '{0}'")]
    CycleDetected(String),

    #[error("Invalid node '{id}': {reason}")]
    InvalidNode { id: String, reason: String },
}

impl GraphError {
    pub(crate) fn invalid(id: &str, reason: impl Into<String>) -> Self {
        GraphError::InvalidNode {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while evaluating a single node. They are caught by the
/// scheduler and never cross the node boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeEvaluationError {
    /// Nothing new to emit this tick; not a failure
    #[error("no data")]
    NoData,

    #[error("missing input {0}")]
    MissingInput(usize),

    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("numeric error: {0}")]
    Numeric(#[from] NumericError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid channel name '{0}'")]
    InvalidChannel(String),

    #[error("node panicked: {0}")]
    Panicked(String),
}

impl NodeEvaluationError {
    pub(crate) fn mismatch(expected: &'static str, actual: &crate::pipeline::Value) -> Self {
        NodeEvaluationError::TypeMismatch {
            expected,
            actual: actual.type_name(),
        }
    }

    /// Whether this outcome counts as a node failure
    pub fn is_failure(&self) -> bool {
        !matches!(self, NodeEvaluationError::NoData)
    }
}

pub type EvalResult<T> = std::result::Result<T, NodeEvaluationError>;
