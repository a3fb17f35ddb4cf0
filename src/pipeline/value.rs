//! Node values, node configuration and per-node state.
//!
//! `Value` is what flows along edges. Sample-carrying variants are behind
//! `Arc`, so fanning a value out to several downstream nodes or copying it
//! into a snapshot never duplicates sample data.

use crate::coherence::CoherenceMatrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Named sample buffers, ordered by channel name
pub type ChannelMap = BTreeMap<String, Vec<f32>>;

/// Output of a node evaluation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Nothing produced yet
    #[default]
    Empty,
    Bool(bool),
    Scalar(f64),
    Text(String),
    Series(Arc<Vec<f32>>),
    Channels(Arc<ChannelMap>),
    Coherence(Arc<CoherenceMatrix>),
}

impl Value {
    pub fn series(samples: Vec<f32>) -> Self {
        Value::Series(Arc::new(samples))
    }

    pub fn channels(channels: ChannelMap) -> Self {
        Value::Channels(Arc::new(channels))
    }

    pub fn coherence(matrix: CoherenceMatrix) -> Self {
        Value::Coherence(Arc::new(matrix))
    }

    /// Short name of the variant, used in type-mismatch errors
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Empty => "empty",
            Value::Bool(_) => "bool",
            Value::Scalar(_) => "scalar",
            Value::Text(_) => "text",
            Value::Series(_) => "series",
            Value::Channels(_) => "channels",
            Value::Coherence(_) => "coherence",
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(v) => Some(*v),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_series(&self) -> Option<&[f32]> {
        match self {
            Value::Series(s) => Some(s.as_slice()),
            _ => None,
        }
    }

    pub fn as_channels(&self) -> Option<&ChannelMap> {
        match self {
            Value::Channels(c) => Some(c.as_ref()),
            _ => None,
        }
    }

    pub fn as_coherence(&self) -> Option<&CoherenceMatrix> {
        match self {
            Value::Coherence(m) => Some(m.as_ref()),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Scalar(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<Vec<f32>> for Value {
    fn from(v: Vec<f32>) -> Self {
        Value::series(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

/// A single node configuration entry.
///
/// Untagged, so TOML/JSON literals map directly: `2`, `0.5`, `true`, `"eeg"`,
/// `[1, 2, 3]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<ConfigValue>),
}

impl ConfigValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Integers, and floats without a fractional part
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(v) => Some(*v),
            ConfigValue::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }

    /// Floats, and integers widened to float
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ConfigValue::Float(v) => Some(*v),
            ConfigValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ConfigValue]> {
        match self {
            ConfigValue::List(v) => Some(v),
            _ => None,
        }
    }

    /// Convert a literal into the value a constant source emits
    pub fn to_value(&self) -> Option<Value> {
        match self {
            ConfigValue::Bool(b) => Some(Value::Bool(*b)),
            ConfigValue::Int(_) | ConfigValue::Float(_) => self.as_float().map(Value::Scalar),
            ConfigValue::String(s) => Some(Value::Text(s.clone())),
            ConfigValue::List(items) => items
                .iter()
                .map(|item| item.as_float().map(|v| v as f32))
                .collect::<Option<Vec<f32>>>()
                .map(Value::series),
        }
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        ConfigValue::Float(v)
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        ConfigValue::Int(v)
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        ConfigValue::Bool(v)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        ConfigValue::String(v.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        ConfigValue::String(v)
    }
}

impl From<Vec<f64>> for ConfigValue {
    fn from(v: Vec<f64>) -> Self {
        ConfigValue::List(v.into_iter().map(ConfigValue::Float).collect())
    }
}

/// Immutable node configuration
pub type ConfigMap = BTreeMap<String, ConfigValue>;

/// Mutable per-node state, persisted across ticks and cleared on reload
pub type StateMap = BTreeMap<String, Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_value_accessors() {
        assert_eq!(ConfigValue::Bool(true).as_bool(), Some(true));
        assert_eq!(ConfigValue::Int(42).as_int(), Some(42));
        assert_eq!(ConfigValue::Int(2).as_float(), Some(2.0));
        assert_eq!(ConfigValue::Float(3.0).as_int(), Some(3));
        assert_eq!(ConfigValue::Float(3.5).as_int(), None);
        assert_eq!(ConfigValue::from("eeg").as_str(), Some("eeg"));
    }

    #[test]
    fn test_config_value_untagged_json() {
        let map: ConfigMap =
            serde_json::from_str(r#"{"op":"scale","gain":2,"offset":0.5,"values":[1,2.5]}"#)
                .unwrap();
        assert_eq!(map["op"], ConfigValue::String("scale".into()));
        assert_eq!(map["gain"], ConfigValue::Int(2));
        assert_eq!(map["offset"], ConfigValue::Float(0.5));
        assert_eq!(map["values"].as_list().map(|l| l.len()), Some(2));
    }

    #[test]
    fn test_config_list_to_series() {
        let list = ConfigValue::from(vec![1.0, 2.0]);
        assert_eq!(list.to_value(), Some(Value::series(vec![1.0, 2.0])));

        let mixed = ConfigValue::List(vec![ConfigValue::Int(1), ConfigValue::from("x")]);
        assert_eq!(mixed.to_value(), None);
    }

    #[test]
    fn test_value_clone_shares_samples() {
        let value = Value::series(vec![0.0; 1024]);
        let copy = value.clone();
        match (&value, &copy) {
            (Value::Series(a), Value::Series(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_value_serialization() {
        let json = serde_json::to_string(&Value::Scalar(1.5)).unwrap();
        assert_eq!(json, r#"{"type":"scalar","value":1.5}"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Value::Scalar(1.5));

        let empty = serde_json::to_string(&Value::Empty).unwrap();
        assert_eq!(empty, r#"{"type":"empty"}"#);
    }
}
