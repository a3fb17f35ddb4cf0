//! Copy-out introspection of the graph.
//!
//! Snapshots own their data (values are `Arc`-shared, never borrowed from
//! the scheduler), so they can be sent across threads or serialized.

use super::graph::GraphStore;
use super::id::NodeId;
use super::node::NodeKind;
use super::value::Value;
use crate::coherence::ComputeTier;
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// One node as seen by an observer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: String,
    pub kind: NodeKind,
    pub op: String,
    pub inputs: Vec<String>,
    pub value: Value,
    /// Clock time of the last successful evaluation
    pub last_update: Option<u64>,
    pub error_count: u64,
    pub last_error: Option<String>,
}

/// All nodes in evaluation order
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DebugSnapshot {
    pub tick: u64,
    pub running: bool,
    /// Tier of the most recent coherence computation, if the graph has one
    pub tier: Option<ComputeTier>,
    pub taken_at: u64,
    pub nodes: Vec<NodeSnapshot>,
}

impl DebugSnapshot {
    pub(crate) fn capture(
        store: &GraphStore,
        order: &[NodeId],
        tick: u64,
        running: bool,
        taken_at: u64,
    ) -> Self {
        let nodes: Vec<NodeSnapshot> = order
            .iter()
            .filter_map(|&nid| store.record(nid))
            .map(|record| NodeSnapshot {
                id: record.def.id.clone(),
                kind: record.def.kind,
                op: record.behavior.op().to_string(),
                inputs: record.def.inputs.clone(),
                value: record.last_output.clone(),
                last_update: record.last_update,
                error_count: record.error_count,
                last_error: record.last_error.clone(),
            })
            .collect();
        let tier = order
            .iter()
            .filter_map(|&nid| store.record(nid))
            .find_map(|record| record.behavior.coherence_tier());

        Self {
            tick,
            running,
            tier,
            taken_at,
            nodes,
        }
    }

    pub fn node(&self, id: &str) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
