//! Node storage, wiring and evaluation order.
//!
//! Nodes live in an arena of [`NodeRecord`]s indexed by [`NodeId`]. Every
//! mutating operation validates first and only then touches the arena, so a
//! rejected `add_node`, `connect` or `load_graph` leaves the store exactly
//! as it was.

use super::bus::BusFrame;
use super::error::GraphError;
use super::id::NodeId;
use super::node::{Behavior, GraphDef, NodeDef, NodeKind};
use super::nodes::NodeFactory;
use super::value::{StateMap, Value};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// A node and everything the scheduler keeps for it
#[derive(Debug)]
pub struct NodeRecord {
    pub def: NodeDef,
    pub behavior: Behavior,
    /// Resolved `def.inputs`, in positional order
    pub upstream: Vec<NodeId>,
    /// Owned by this node alone; replaced on every successful evaluation
    pub state: StateMap,
    pub last_output: Value,
    /// Clock time of the last successful evaluation
    pub last_update: Option<u64>,
    /// Newest routed bus frame not yet consumed (bus sources only)
    pub latest_frame: Option<BusFrame>,
    pub error_count: u64,
    pub last_error: Option<String>,
}

impl NodeRecord {
    fn new(def: NodeDef, behavior: Behavior) -> Self {
        Self {
            def,
            behavior,
            upstream: Vec::new(),
            state: StateMap::new(),
            last_output: Value::Empty,
            last_update: None,
            latest_frame: None,
            error_count: 0,
            last_error: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.def.id
    }

    pub fn kind(&self) -> NodeKind {
        self.def.kind
    }
}

/// The graph: node arena, id index and a generation counter for plan caching
pub struct GraphStore {
    id: String,
    nodes: Vec<NodeRecord>,
    index: HashMap<String, NodeId>,
    generation: u64,
    factory: NodeFactory,
}

impl GraphStore {
    pub fn new(factory: NodeFactory) -> Self {
        Self {
            id: String::new(),
            nodes: Vec::new(),
            index: HashMap::new(),
            generation: 0,
            factory,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn factory(&self) -> &NodeFactory {
        &self.factory
    }

    /// Bumped on every successful mutation
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_id(&self, id: &str) -> Option<NodeId> {
        self.index.get(id).copied()
    }

    pub fn get(&self, id: &str) -> Option<&NodeRecord> {
        self.node_id(id).map(|nid| &self.nodes[nid.index()])
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut NodeRecord> {
        let nid = self.node_id(id)?;
        self.nodes.get_mut(nid.index())
    }

    pub fn record(&self, id: NodeId) -> Option<&NodeRecord> {
        self.nodes.get(id.index())
    }

    pub fn record_mut(&mut self, id: NodeId) -> Option<&mut NodeRecord> {
        self.nodes.get_mut(id.index())
    }

    /// Node ids in insertion order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(NodeRecord::id)
    }

    pub fn records(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.iter()
    }

    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut NodeRecord> {
        self.nodes.iter_mut()
    }

    /// Number of input edges
    pub fn edge_count(&self) -> usize {
        self.nodes.iter().map(|n| n.upstream.len()).sum()
    }

    /// Add a node whose inputs already exist
    pub fn add_node(&mut self, def: NodeDef) -> Result<NodeId, GraphError> {
        if self.index.contains_key(&def.id) {
            return Err(GraphError::DuplicateId(def.id));
        }
        let upstream = def
            .inputs
            .iter()
            .map(|input| {
                self.node_id(input)
                    .ok_or_else(|| GraphError::UnknownUpstream(input.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let behavior = self.factory.build(&def)?;

        let nid = NodeId::from_index(self.nodes.len());
        self.index.insert(def.id.clone(), nid);
        let mut record = NodeRecord::new(def, behavior);
        record.upstream = upstream;
        self.nodes.push(record);
        self.generation += 1;
        Ok(nid)
    }

    /// Append `src` to `dst`'s inputs. Connecting an existing edge is a no-op.
    pub fn connect(&mut self, src: &str, dst: &str) -> Result<(), GraphError> {
        let from = self
            .node_id(src)
            .ok_or_else(|| GraphError::UnknownUpstream(src.to_string()))?;
        let to = self
            .node_id(dst)
            .ok_or_else(|| GraphError::UnknownNode(dst.to_string()))?;

        if from == to {
            return Err(GraphError::CycleDetected(dst.to_string()));
        }
        if self.nodes[to.index()].upstream.contains(&from) {
            return Ok(());
        }
        if self.depends_on(from, to) {
            return Err(GraphError::CycleDetected(dst.to_string()));
        }

        let record = &mut self.nodes[to.index()];
        record.upstream.push(from);
        record.def.inputs.push(src.to_string());
        self.generation += 1;
        Ok(())
    }

    /// Whether `node` transitively reads from `ancestor`
    fn depends_on(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![node];

        while let Some(current) = stack.pop() {
            if current == ancestor {
                return true;
            }
            let idx = current.index();
            if idx >= self.nodes.len() || visited[idx] {
                continue;
            }
            visited[idx] = true;
            stack.extend(self.nodes[idx].upstream.iter().copied());
        }
        false
    }

    /// Evaluation order: every node after all of its inputs, ties broken by
    /// insertion order.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let n = self.nodes.len();
        let mut in_degree = vec![0usize; n];
        let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); n];

        for (to, record) in self.nodes.iter().enumerate() {
            for from in &record.upstream {
                downstream[from.index()].push(to);
                in_degree[to] += 1;
            }
        }

        // Kahn's algorithm with a min-heap so ready nodes come out by slot
        let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
            .filter(|&i| in_degree[i] == 0)
            .map(Reverse)
            .collect();
        let mut order = Vec::with_capacity(n);

        while let Some(Reverse(node)) = ready.pop() {
            order.push(NodeId::from_index(node));
            for &next in &downstream[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() != n {
            let stuck = (0..n).find(|&i| in_degree[i] > 0).unwrap_or(0);
            return Err(GraphError::CycleDetected(self.nodes[stuck].def.id.clone()));
        }
        Ok(order)
    }

    /// Replace every node with the contents of `def`, clearing all state.
    ///
    /// Nodes may appear in any order in the definition. On error the
    /// current graph is left untouched.
    pub fn load_graph(&mut self, def: GraphDef) -> Result<(), GraphError> {
        let mut next = GraphStore::new(self.factory.clone());
        next.id = def.id;

        for node in def.nodes {
            if next.index.contains_key(&node.id) {
                return Err(GraphError::DuplicateId(node.id));
            }
            let behavior = next.factory.build(&node)?;
            let nid = NodeId::from_index(next.nodes.len());
            next.index.insert(node.id.clone(), nid);
            next.nodes.push(NodeRecord::new(node, behavior));
        }

        for i in 0..next.nodes.len() {
            let upstream = next.nodes[i]
                .def
                .inputs
                .iter()
                .map(|input| {
                    next.node_id(input)
                        .ok_or_else(|| GraphError::UnknownUpstream(input.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            next.nodes[i].upstream = upstream;
        }
        next.topological_order()?;

        next.generation = self.generation + 1;
        *self = next;
        Ok(())
    }

    /// Serializable description of the current graph
    pub fn to_def(&self) -> GraphDef {
        GraphDef {
            id: self.id.clone(),
            nodes: self.nodes.iter().map(|n| n.def.clone()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coherence::TierGate;
    use crate::config::CoherenceConfig;
    use std::sync::Arc;

    fn store() -> GraphStore {
        GraphStore::new(NodeFactory::new(
            CoherenceConfig::default(),
            Arc::new(TierGate::new()),
        ))
    }

    fn constant(id: &str) -> NodeDef {
        NodeDef::source(id).op("constant").with("value", 1.0)
    }

    fn ids(store: &GraphStore, order: &[NodeId]) -> Vec<String> {
        order
            .iter()
            .map(|&nid| store.record(nid).unwrap().id().to_string())
            .collect()
    }

    #[test]
    fn test_add_node_rejects_duplicates_and_dangling_inputs() {
        let mut g = store();
        g.add_node(constant("a")).unwrap();

        assert_eq!(
            g.add_node(constant("a")).unwrap_err(),
            GraphError::DuplicateId("a".into())
        );
        assert_eq!(
            g.add_node(NodeDef::transform("b").input("missing")).unwrap_err(),
            GraphError::UnknownUpstream("missing".into())
        );
        assert_eq!(g.len(), 1);
        assert!(g.get("b").is_none());
    }

    #[test]
    fn test_add_node_rejects_invalid_config_atomically() {
        let mut g = store();
        let generation = g.generation();
        let err = g.add_node(NodeDef::transform("x").op("nope")).unwrap_err();
        assert!(matches!(err, GraphError::InvalidNode { .. }));
        assert!(g.is_empty());
        assert_eq!(g.generation(), generation);
    }

    #[test]
    fn test_connect_is_idempotent() {
        let mut g = store();
        g.add_node(constant("a")).unwrap();
        g.add_node(NodeDef::transform("b")).unwrap();
        g.connect("a", "b").unwrap();
        let generation = g.generation();
        g.connect("a", "b").unwrap();
        assert_eq!(g.get("b").unwrap().def.inputs, vec!["a".to_string()]);
        assert_eq!(g.generation(), generation);
    }

    #[test]
    fn test_connect_unknown_ends() {
        let mut g = store();
        g.add_node(constant("a")).unwrap();
        assert_eq!(
            g.connect("ghost", "a").unwrap_err(),
            GraphError::UnknownUpstream("ghost".into())
        );
        assert_eq!(
            g.connect("a", "ghost").unwrap_err(),
            GraphError::UnknownNode("ghost".into())
        );
    }

    #[test]
    fn test_two_node_cycle_is_rejected() {
        let mut g = store();
        g.add_node(NodeDef::transform("a")).unwrap();
        g.add_node(NodeDef::transform("b")).unwrap();
        g.connect("a", "b").unwrap();

        let err = g.connect("b", "a").unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected(_)));
        assert!(g.get("a").unwrap().def.inputs.is_empty());
        assert_eq!(g.get("b").unwrap().def.inputs, vec!["a".to_string()]);
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn test_self_loop_is_rejected() {
        let mut g = store();
        g.add_node(NodeDef::transform("a")).unwrap();
        assert!(matches!(
            g.connect("a", "a").unwrap_err(),
            GraphError::CycleDetected(_)
        ));
    }

    #[test]
    fn test_long_cycle_is_rejected() {
        let mut g = store();
        g.add_node(constant("a")).unwrap();
        g.add_node(NodeDef::transform("b").input("a")).unwrap();
        g.add_node(NodeDef::transform("c").input("b")).unwrap();
        g.add_node(NodeDef::transform("d").input("c")).unwrap();
        assert!(g.connect("d", "b").is_err());
        assert!(g.topological_order().is_ok());
    }

    #[test]
    fn test_topological_order_breaks_ties_by_insertion() {
        let mut g = store();
        g.add_node(constant("s2")).unwrap();
        g.add_node(constant("s1")).unwrap();
        g.add_node(NodeDef::transform("t").input("s1").input("s2")).unwrap();
        g.add_node(constant("s3")).unwrap();

        let order = g.topological_order().unwrap();
        assert_eq!(ids(&g, &order), vec!["s2", "s1", "t", "s3"]);
    }

    #[test]
    fn test_topological_order_diamond() {
        let mut g = store();
        g.add_node(constant("a")).unwrap();
        g.add_node(NodeDef::transform("b")).unwrap();
        g.add_node(NodeDef::transform("c").input("a")).unwrap();
        g.add_node(NodeDef::transform("d").input("b").input("c")).unwrap();
        g.connect("a", "b").unwrap();

        let order = ids(&g, &g.topological_order().unwrap());
        assert_eq!(order, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_load_graph_accepts_any_definition_order() {
        let mut g = store();
        let def = GraphDef::new("g")
            .node(NodeDef::sink("out").op("log").input("mid"))
            .node(NodeDef::transform("mid").input("src"))
            .node(constant("src"));
        g.load_graph(def).unwrap();

        assert_eq!(g.id(), "g");
        let order = ids(&g, &g.topological_order().unwrap());
        assert_eq!(order, vec!["src", "mid", "out"]);
    }

    #[test]
    fn test_load_graph_failure_keeps_previous_graph() {
        let mut g = store();
        g.add_node(constant("keep")).unwrap();
        let generation = g.generation();

        let cyclic = GraphDef::new("bad")
            .node(NodeDef::transform("x").input("y"))
            .node(NodeDef::transform("y").input("x"));
        assert!(matches!(
            g.load_graph(cyclic).unwrap_err(),
            GraphError::CycleDetected(_)
        ));

        let dangling = GraphDef::new("bad").node(NodeDef::transform("x").input("nowhere"));
        assert_eq!(
            g.load_graph(dangling).unwrap_err(),
            GraphError::UnknownUpstream("nowhere".into())
        );

        let duplicate = GraphDef::new("bad").node(constant("x")).node(constant("x"));
        assert_eq!(
            g.load_graph(duplicate).unwrap_err(),
            GraphError::DuplicateId("x".into())
        );

        assert_eq!(g.ids().collect::<Vec<_>>(), vec!["keep"]);
        assert_eq!(g.generation(), generation);
    }

    #[test]
    fn test_load_graph_clears_state() {
        let mut g = store();
        g.add_node(constant("a")).unwrap();
        g.get_mut("a")
            .unwrap()
            .state
            .insert("k".into(), Value::Scalar(1.0));

        g.load_graph(GraphDef::new("fresh").node(constant("a"))).unwrap();
        let record = g.get("a").unwrap();
        assert!(record.state.is_empty());
        assert!(record.last_update.is_none());
    }

    #[test]
    fn test_to_def_round_trips_through_load() {
        let mut g = store();
        g.add_node(constant("a")).unwrap();
        g.add_node(NodeDef::transform("b")).unwrap();
        g.connect("a", "b").unwrap();

        let def = g.to_def();
        let mut copy = store();
        copy.load_graph(def.clone()).unwrap();
        assert_eq!(copy.to_def(), def);
    }
}
