//! Integration tests for graph scheduling
//!
//! These tests validate the engine's tick semantics:
//! - Evaluation order and graph validation
//! - Fault isolation between nodes
//! - Start/stop/reload lifecycle
//! - The engine thread and its bridge

mod common;

use common::builders::reciprocal_chain;
use common::mock_helpers::CountingProducer;
use common::{assert_float_eq, wait_until};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use stream_engine::config::EngineConfig;
use stream_engine::pipeline::{
    Engine, EngineMessage, GraphDef, GraphError, NodeDef, Value,
};
use stream_engine::ManualClock;

fn engine() -> Engine {
    Engine::new(&EngineConfig::default()).with_clock(Arc::new(ManualClock::new(0)))
}

fn scalar(engine: &Engine, id: &str) -> f64 {
    engine
        .graph()
        .get(id)
        .and_then(|r| r.last_output.as_scalar())
        .unwrap_or(f64::NAN)
}

/// Random DAG over `n` nodes: node 0 is a constant, node `j > 0` sums its
/// predecessor plus any earlier node flagged in `extra[j]`.
fn sum_dag(n: usize, extra: &[Vec<bool>]) -> (Vec<NodeDef>, Vec<f64>) {
    let mut defs = Vec::with_capacity(n);
    let mut expected = vec![0.0; n];
    defs.push(NodeDef::source("n0").op("constant").with("value", 1.0));
    expected[0] = 1.0;

    for j in 1..n {
        let mut def = NodeDef::transform(format!("n{}", j)).op("sum");
        for i in 0..j {
            if i == j - 1 || extra[j][i] {
                def = def.input(format!("n{}", i));
                expected[j] += expected[i];
            }
        }
        defs.push(def);
    }
    (defs, expected)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_any_declaration_order_evaluates_inputs_first(
        (n, extra, order) in (2usize..10).prop_flat_map(|n| (
            Just(n),
            prop::collection::vec(prop::collection::vec(any::<bool>(), n), n),
            Just((0..n).collect::<Vec<_>>()).prop_shuffle(),
        ))
    ) {
        let (defs, expected) = sum_dag(n, &extra);
        let mut graph = GraphDef::new("dag");
        for &i in &order {
            graph = graph.node(defs[i].clone());
        }

        let mut e = engine();
        e.load_graph(graph).unwrap();
        e.start();
        let report = e.tick();
        prop_assert_eq!(report.evaluated, n);
        prop_assert_eq!(report.failed, 0);

        let snapshot = e.snapshot();
        let position: HashMap<&str, usize> = snapshot
            .nodes
            .iter()
            .enumerate()
            .map(|(pos, node)| (node.id.as_str(), pos))
            .collect();
        for node in &snapshot.nodes {
            for input in &node.inputs {
                prop_assert!(position[input.as_str()] < position[node.id.as_str()]);
            }
        }
        for (j, value) in expected.iter().enumerate() {
            prop_assert_eq!(scalar(&e, &format!("n{}", j)), *value);
        }
    }
}

#[test]
fn test_cyclic_graph_is_rejected_without_side_effects() {
    let mut e = engine();
    e.load_graph(reciprocal_chain(vec![2.0], 1.0)).unwrap();
    e.start();
    e.tick();

    let cyclic = GraphDef::new("cyclic")
        .node(NodeDef::transform("a").input("b"))
        .node(NodeDef::transform("b").input("a"));
    let err = e.load_graph(cyclic).unwrap_err();
    assert!(matches!(err, GraphError::CycleDetected(_)));

    // Previous graph untouched and still running
    assert!(e.is_running());
    assert_eq!(e.graph().id(), "reciprocal-chain");
    assert_eq!(scalar(&e, "recip"), 0.5);
}

#[test]
fn test_unknown_input_is_rejected() {
    let mut e = engine();
    let err = e
        .load_graph(GraphDef::new("g").node(NodeDef::transform("a").input("ghost")))
        .unwrap_err();
    assert!(matches!(err, GraphError::UnknownUpstream(ref id) if id == "ghost"));
    assert!(e.graph().is_empty());
}

#[test]
fn test_connect_refuses_back_edges() {
    let mut e = engine();
    e.load_graph(reciprocal_chain(vec![1.0], 1.0)).unwrap();
    assert!(matches!(
        e.connect("scaled", "seq"),
        Err(GraphError::CycleDetected(_))
    ));
    assert!(matches!(
        e.connect("recip", "recip"),
        Err(GraphError::CycleDetected(_))
    ));
    // Existing edge is a no-op
    e.connect("seq", "recip").unwrap();
    assert_eq!(e.graph().get("recip").unwrap().def.inputs, vec!["seq"]);
}

#[test]
fn test_failing_node_does_not_stop_the_tick() {
    let mut e = engine();
    e.load_graph(reciprocal_chain(vec![1.0, 2.0, 3.0, 4.0, 0.0, 6.0], 2.0))
        .unwrap();
    e.start();

    for _ in 0..4 {
        assert_eq!(e.tick().failed, 0);
    }
    assert_float_eq(scalar(&e, "scaled"), 0.5, 1e-12);

    // Division by zero: reciprocal keeps 1/4, downstream recomputes from it
    let report = e.tick();
    assert_eq!(report.failed, 1);
    assert_eq!(report.evaluated, 2);
    assert_float_eq(scalar(&e, "recip"), 0.25, 1e-12);
    assert_float_eq(scalar(&e, "scaled"), 0.5, 1e-12);

    let recip = e.graph().get("recip").unwrap();
    assert_eq!(recip.error_count, 1);
    assert!(recip.last_error.is_some());

    // Recovers on the next good input
    assert_eq!(e.tick().failed, 0);
    assert_float_eq(scalar(&e, "scaled"), 2.0 / 6.0, 1e-12);
    assert_eq!(e.stats().node_failures, 1);
}

#[test]
fn test_stateful_nodes_only_advance_on_fresh_input() {
    let mut e = engine();
    e.load_graph(
        GraphDef::new("ema")
            .node(
                NodeDef::source("seq")
                    .op("sequence")
                    .with("values", vec![10.0, 20.0]),
            )
            .node(
                NodeDef::transform("smooth")
                    .op("ema")
                    .with("alpha", 0.5)
                    .input("seq"),
            ),
    )
    .unwrap();
    e.start();

    e.tick();
    e.tick();
    assert_float_eq(scalar(&e, "smooth"), 15.0, 1e-12);

    // Sequence exhausted: nothing fresh, EMA holds
    let report = e.tick();
    assert_eq!(report.no_data, 2);
    assert_eq!(report.failed, 0);
    assert_float_eq(scalar(&e, "smooth"), 15.0, 1e-12);
}

#[test]
fn test_stale_data_does_not_leak_through_stateless_transforms() {
    let mut e = engine();
    e.load_graph(
        GraphDef::new("relay")
            .node(
                NodeDef::source("seq")
                    .op("sequence")
                    .with("values", vec![10.0, 20.0]),
            )
            .node(NodeDef::transform("copy").op("scale").input("seq"))
            .node(
                NodeDef::transform("smooth")
                    .op("ema")
                    .with("alpha", 0.5)
                    .input("copy"),
            ),
    )
    .unwrap();
    e.start();

    e.tick();
    e.tick();
    assert_float_eq(scalar(&e, "smooth"), 15.0, 1e-12);

    for _ in 0..3 {
        let report = e.tick();
        assert_eq!(report.no_data, 2);
        assert_eq!(report.evaluated, 1);
    }
    assert_float_eq(scalar(&e, "copy"), 20.0, 1e-12);
    assert_float_eq(scalar(&e, "smooth"), 15.0, 1e-12);
}

#[test]
fn test_stop_pauses_and_keeps_state() {
    let mut e = engine();
    e.load_graph(reciprocal_chain(vec![1.0, 2.0, 4.0], 1.0))
        .unwrap();

    assert!(e.tick().idle);
    e.start();
    e.tick();
    e.stop();
    assert!(e.tick().idle);
    assert_eq!(e.tick_count(), 1);

    e.start();
    e.tick();
    assert_float_eq(scalar(&e, "recip"), 0.5, 1e-12);
    assert_eq!(e.tick_count(), 2);
}

#[test]
fn test_reload_clears_state_and_stops() {
    let producer = CountingProducer::default();
    let (started, stopped) = (Arc::clone(&producer.starts), Arc::clone(&producer.stops));

    let mut e = engine();
    e.add_producer(Box::new(producer));
    e.load_graph(reciprocal_chain(vec![1.0, 2.0, 4.0], 1.0))
        .unwrap();
    e.start();
    e.tick();
    e.tick();

    e.load_graph(reciprocal_chain(vec![1.0, 2.0, 4.0], 1.0))
        .unwrap();
    assert!(!e.is_running());
    assert_eq!(stopped.load(Ordering::SeqCst), 1);
    assert_eq!(e.graph().get("recip").unwrap().last_output, Value::Empty);
    assert_eq!(e.graph().get("seq").unwrap().last_update, None);

    e.start();
    assert_eq!(started.load(Ordering::SeqCst), 2);
    assert_eq!(e.tick().tick, 1);
    assert_float_eq(scalar(&e, "recip"), 1.0, 1e-12);
}

#[test]
fn test_last_update_uses_engine_clock() {
    let clock = Arc::new(ManualClock::new(1_000));
    let mut e = Engine::new(&EngineConfig::default()).with_clock(clock.clone());
    e.load_graph(reciprocal_chain(vec![1.0], 1.0)).unwrap();
    e.start();

    e.tick();
    clock.advance(250);
    e.tick();

    // Sequence exhausted on the second tick; downstream still recomputed
    let snapshot = e.snapshot();
    assert_eq!(snapshot.node("seq").unwrap().last_update, Some(1_000));
    assert_eq!(snapshot.node("recip").unwrap().last_update, Some(1_250));
    assert_eq!(snapshot.taken_at, 1_250);
}

#[test]
fn test_engine_thread_round_trip() {
    let mut config = EngineConfig::default();
    config.scheduler.tick_rate_hz = 200;
    let (bridge, handle) = Engine::new(&config).spawn().unwrap();

    bridge.load_graph(GraphDef::new("live").node(
        NodeDef::source("osc")
            .op("oscillator")
            .with("frequency_hz", 10.0),
    ));
    bridge.start();

    let mut messages = Vec::new();
    let ticked = wait_until(|| {
        bridge.request_stats();
        std::thread::sleep(std::time::Duration::from_millis(10));
        messages.extend(bridge.drain());
        messages
            .iter()
            .any(|m| matches!(m, EngineMessage::Stats(s) if s.tick >= 3))
    });
    assert!(ticked, "engine never ticked");
    assert!(messages
        .iter()
        .any(|m| matches!(m, EngineMessage::GraphLoaded(id) if id == "live")));
    assert!(messages.iter().any(|m| matches!(m, EngineMessage::Started)));

    bridge.stop();
    bridge.request_snapshot();
    bridge.shutdown();
    handle.join().unwrap();

    let rest = bridge.drain();
    let snapshot = rest
        .iter()
        .find_map(|m| match m {
            EngineMessage::Snapshot(s) => Some(s.clone()),
            _ => None,
        })
        .unwrap();
    assert!(!snapshot.running);
    assert!(matches!(
        snapshot.node("osc").unwrap().value,
        Value::Series(_)
    ));
    assert!(matches!(rest.last(), Some(EngineMessage::Shutdown)));
}

#[test]
fn test_dropping_the_bridge_ends_the_engine_thread() {
    let (bridge, handle) = engine().spawn().unwrap();
    drop(bridge);
    assert!(handle.join().is_ok());
}
