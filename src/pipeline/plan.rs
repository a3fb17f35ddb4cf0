use super::error::GraphError;
use super::graph::GraphStore;
use super::id::NodeId;
use super::node::NodeKind;
use std::time::Instant;

/// Cached evaluation order for one graph generation
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    /// Node slots in topological order
    pub order: Vec<NodeId>,

    /// Generation of the graph this plan was compiled from
    pub generation: u64,

    /// Compilation statistics
    pub stats: PlanStats,
}

/// Statistics about the compiled plan
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanStats {
    pub total_nodes: usize,
    pub source_nodes: usize,
    pub transform_nodes: usize,
    pub sink_nodes: usize,
    pub edges: usize,
    /// Compilation time in microseconds
    pub compile_time_us: u64,
}

impl ExecutionPlan {
    pub fn compile(store: &GraphStore) -> Result<Self, GraphError> {
        let start_time = Instant::now();
        let order = store.topological_order()?;

        let count = |kind: NodeKind| store.records().filter(|r| r.kind() == kind).count();
        let stats = PlanStats {
            total_nodes: store.len(),
            source_nodes: count(NodeKind::Source),
            transform_nodes: count(NodeKind::Transform),
            sink_nodes: count(NodeKind::Sink),
            edges: store.edge_count(),
            compile_time_us: start_time.elapsed().as_micros() as u64,
        };

        Ok(Self {
            order,
            generation: store.generation(),
            stats,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Whether the plan still matches `store`
    pub fn is_current(&self, store: &GraphStore) -> bool {
        self.generation == store.generation()
    }
}
