//! Coherence matrix and compute-tier types

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Separator used in canonical pair keys
pub const PAIR_SEPARATOR: char = '|';

/// Canonical key for an unordered channel pair (`"a|b"` with `a <= b`)
pub fn pair_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}{}{}", a, PAIR_SEPARATOR, b)
    } else {
        format!("{}{}{}", b, PAIR_SEPARATOR, a)
    }
}

/// Whether `name` can take part in a pair key without ambiguity
pub fn is_valid_channel_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(PAIR_SEPARATOR)
}

/// Split a canonical pair key back into its channel names
pub fn split_pair_key(key: &str) -> Option<(&str, &str)> {
    key.split_once(PAIR_SEPARATOR)
}

/// Execution substrate that produced a coherence result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeTier {
    Gpu,
    #[default]
    Cpu,
}

impl ComputeTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComputeTier::Gpu => "gpu",
            ComputeTier::Cpu => "cpu",
        }
    }
}

impl fmt::Display for ComputeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Smoothed pairwise ciPLV values for one tick
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CoherenceMatrix {
    /// Pair key → smoothed ciPLV in `[0, 1]`
    pub matrix: BTreeMap<String, f32>,
    /// Mean over all pair values (0 when there are no pairs)
    pub global_sync: f32,
    /// Tier that produced the raw values
    pub engine: ComputeTier,
}

impl CoherenceMatrix {
    pub fn empty(engine: ComputeTier) -> Self {
        Self {
            matrix: BTreeMap::new(),
            global_sync: 0.0,
            engine,
        }
    }

    /// Value for the unordered pair `(a, b)`
    pub fn get(&self, a: &str, b: &str) -> Option<f32> {
        self.matrix.get(&pair_key(a, b)).copied()
    }

    pub fn len(&self) -> usize {
        self.matrix.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matrix.is_empty()
    }

    /// Every channel name that appears in at least one pair
    pub fn channels(&self) -> BTreeSet<String> {
        self.matrix
            .keys()
            .filter_map(|k| split_pair_key(k))
            .flat_map(|(a, b)| [a.to_string(), b.to_string()])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_key_is_order_independent() {
        assert_eq!(pair_key("Fz", "Cz"), pair_key("Cz", "Fz"));
        assert_eq!(pair_key("Cz", "Fz"), "Cz|Fz");
        assert_eq!(split_pair_key("Cz|Fz"), Some(("Cz", "Fz")));
    }

    #[test]
    fn test_channels_and_lookup() {
        let mut m = CoherenceMatrix::empty(ComputeTier::Cpu);
        m.matrix.insert(pair_key("a", "b"), 0.5);
        m.matrix.insert(pair_key("b", "c"), 0.25);
        assert_eq!(m.get("b", "a"), Some(0.5));
        assert_eq!(m.get("a", "c"), None);
        let channels: Vec<_> = m.channels().into_iter().collect();
        assert_eq!(channels, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_tier_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ComputeTier::Gpu).unwrap(), "\"gpu\"");
        assert_eq!(ComputeTier::Cpu.to_string(), "cpu");
    }
}
