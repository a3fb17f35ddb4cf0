//! Integration tests for coherence graphs
//!
//! These tests validate coherence running inside the engine:
//! - Phase-lagged tones vs. independent noise
//! - Channel decay driven by the engine clock
//! - GPU→CPU fallback and re-arming on start

mod common;

use common::builders::{coherence_graph, EegFrameBuilder};
use common::mock_helpers::{scripted_gpu_factory, unavailable_gpu_factory};
use common::tone;
use std::f32::consts::PI;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use stream_engine::coherence::{CoherenceMatrix, ComputeTier};
use stream_engine::config::{EngineConfig, SyntheticEegConfig};
use stream_engine::pipeline::{BusFrame, FramePayload, FrameType, GraphDef, NodeDef};
use stream_engine::producer::EegGenerator;
use stream_engine::{Engine, ManualClock};

fn cpu_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.coherence.prefer_gpu = false;
    config
}

fn matrix(engine: &Engine, id: &str) -> CoherenceMatrix {
    engine
        .graph()
        .get(id)
        .and_then(|r| r.last_output.as_coherence())
        .cloned()
        .unwrap_or_default()
}

/// Publish a frame of `n` samples per channel, lagged by `k * lag` per channel
fn publish_tones(engine: &Engine, channels: &[&str], offset: usize, n: usize, lag: f32) {
    let mut frame = EegFrameBuilder::new("eeg");
    for (k, name) in channels.iter().enumerate() {
        frame = frame.channel(name, tone(10.0, 256.0, offset, n, k as f32 * lag));
    }
    engine.bus().publish(frame.build());
}

#[test]
fn test_quadrature_oscillators_are_coherent() {
    let graph = GraphDef::new("oscillators")
        .node(
            NodeDef::source("o1")
                .op("oscillator")
                .with("frequency_hz", 10.0),
        )
        .node(
            NodeDef::source("o2")
                .op("oscillator")
                .with("frequency_hz", 10.0)
                .with("phase", std::f64::consts::FRAC_PI_2),
        )
        .node(
            NodeDef::transform("merged")
                .op("merge_channels")
                .input("o1")
                .input("o2"),
        )
        .node(NodeDef::transform("coh").op("coherence").input("merged"))
        .node(NodeDef::transform("sync").op("global_sync").input("coh"));

    let mut e = Engine::new(&cpu_config());
    e.load_graph(graph).unwrap();
    e.start();

    // 16 samples per tick: the 256-sample windows fill on tick 16
    for _ in 0..15 {
        e.tick();
    }
    assert!(matrix(&e, "coh").is_empty());

    for _ in 0..25 {
        assert_eq!(e.tick().failed, 0);
    }
    let m = matrix(&e, "coh");
    let value = m.get("o1", "o2").unwrap();
    assert!(value >= 0.95, "ciPLV {}", value);
    assert_eq!(m.engine, ComputeTier::Cpu);

    let sync = e.graph().get("sync").unwrap().last_output.as_scalar().unwrap();
    assert!((sync - value as f64).abs() < 1e-6);
    assert_eq!(e.current_tier(), Some(ComputeTier::Cpu));
}

/// Global sync after 40 frames of independent noise on six channels
fn noise_global_sync(seed: u64) -> f32 {
    let channels: Vec<String> = (0..6).map(|i| format!("ch{}", i)).collect();
    let mut generator = EegGenerator::new(SyntheticEegConfig {
        channels,
        amplitude: 0.0,
        noise: 1.0,
        seed: Some(seed),
        ..SyntheticEegConfig::default()
    });

    let graph = GraphDef::new("noise")
        .node(NodeDef::source("eeg").with("source_id", "eeg"))
        .node(
            NodeDef::transform("coh")
                .op("coherence")
                .with("band_low_hz", 4.0)
                .with("band_high_hz", 40.0)
                .input("eeg"),
        );
    let mut e = Engine::new(&cpu_config());
    e.load_graph(graph).unwrap();
    e.start();

    for t in 0..40u64 {
        e.bus().publish(BusFrame::new(
            t,
            "eeg",
            FrameType::Eeg,
            FramePayload::channels(256.0, generator.next_block()),
        ));
        e.tick();
    }

    let m = matrix(&e, "coh");
    assert_eq!(m.len(), 15);
    assert!(m.matrix.values().all(|v| (0.0..=1.0).contains(v)));
    m.global_sync
}

#[test]
fn test_independent_noise_has_low_global_sync() {
    let seeds = [3u64, 11, 29, 47, 101, 977];
    let syncs: Vec<f32> = seeds.iter().map(|&seed| noise_global_sync(seed)).collect();
    let mean = syncs.iter().sum::<f32>() / syncs.len() as f32;
    assert!(mean <= 0.3, "mean global sync {} over {:?}", mean, syncs);
}

#[test]
fn test_silent_channels_decay_out_of_the_matrix() {
    let clock = Arc::new(ManualClock::new(0));
    let mut e = Engine::new(&cpu_config()).with_clock(clock.clone());
    let mut graph = coherence_graph("eeg");
    graph.nodes[1] = graph.nodes[1].clone().with("window_size", 64i64);
    e.load_graph(graph).unwrap();
    e.start();

    publish_tones(&e, &["a", "b", "c"], 0, 64, PI / 2.0);
    e.tick();
    assert_eq!(matrix(&e, "coh").len(), 3);

    // `c` goes quiet; exactly decay_ms later it is still remembered
    for (i, now) in [1_000u64, 2_000, 3_000].into_iter().enumerate() {
        clock.set(now);
        publish_tones(&e, &["a", "b"], 64 * (i + 1), 64, PI / 2.0);
        e.tick();
        assert_eq!(matrix(&e, "coh").len(), 3, "at {} ms", now);
    }

    clock.set(3_001);
    publish_tones(&e, &["a", "b"], 256, 64, PI / 2.0);
    e.tick();
    let m = matrix(&e, "coh");
    assert_eq!(m.len(), 1);
    assert!(m.get("a", "b").is_some());
    assert!(m.get("a", "c").is_none());
    assert!(!m.channels().contains("c"));
}

#[test]
fn test_decay_reaches_through_intermediate_transforms() {
    for op in ["passthrough", "merge_channels"] {
        let clock = Arc::new(ManualClock::new(0));
        let mut e = Engine::new(&cpu_config()).with_clock(clock.clone());
        e.load_graph(
            GraphDef::new("relay")
                .node(NodeDef::source("eeg").with("source_id", "eeg"))
                .node(NodeDef::transform("relay").op(op).input("eeg"))
                .node(
                    NodeDef::transform("coh")
                        .op("coherence")
                        .with("window_size", 64i64)
                        .input("relay"),
                ),
        )
        .unwrap();
        e.start();

        publish_tones(&e, &["a", "b"], 0, 64, PI / 2.0);
        e.tick();
        assert_eq!(matrix(&e, "coh").len(), 1, "{}", op);

        // Producer gone: the relay keeps recomputing from the last frame
        for now in [1_000u64, 2_000, 3_500, 10_000] {
            clock.set(now);
            e.tick();
        }
        assert!(matrix(&e, "coh").is_empty(), "{} kept silent channels", op);
    }
}

#[test]
fn test_gpu_failure_falls_back_to_identical_cpu_results() {
    let constructed = Arc::new(AtomicUsize::new(0));
    let mut tiered = Engine::new(&EngineConfig::default())
        .with_backend_factory(scripted_gpu_factory(Some(3), Arc::clone(&constructed)));
    let mut cpu = Engine::new(&cpu_config());

    for engine in [&mut tiered, &mut cpu] {
        engine.load_graph(coherence_graph("eeg")).unwrap();
        engine.start();
    }

    let mut tiers = Vec::new();
    for i in 0..6 {
        for engine in [&tiered, &cpu] {
            publish_tones(engine, &["Fz", "Cz", "Pz"], 256 * i, 256, PI / 3.0);
        }
        tiered.tick();
        cpu.tick();

        let (a, b) = (matrix(&tiered, "coh"), matrix(&cpu, "coh"));
        assert_eq!(a.matrix, b.matrix, "tick {}", i + 1);
        assert_eq!(a.global_sync, b.global_sync);
        tiers.push(a.engine);
    }

    use ComputeTier::{Cpu, Gpu};
    assert_eq!(tiers, vec![Gpu, Gpu, Cpu, Cpu, Cpu, Cpu]);
    assert_eq!(constructed.load(Ordering::SeqCst), 1);
    assert!(!tiered.tier_gate().is_available());

    // A new session may try the accelerator again
    tiered.stop();
    tiered.start();
    publish_tones(&tiered, &["Fz", "Cz", "Pz"], 256 * 6, 256, PI / 3.0);
    tiered.tick();
    assert_eq!(matrix(&tiered, "coh").engine, Gpu);
    assert_eq!(constructed.load(Ordering::SeqCst), 2);
}

#[test]
fn test_unavailable_accelerator_is_tried_once_per_session() {
    let constructed = Arc::new(AtomicUsize::new(0));
    let mut e = Engine::new(&EngineConfig::default())
        .with_backend_factory(unavailable_gpu_factory(Arc::clone(&constructed)));
    e.load_graph(coherence_graph("eeg")).unwrap();
    e.start();

    for i in 0..5 {
        publish_tones(&e, &["Fz", "Cz"], 256 * i, 256, PI / 2.0);
        assert_eq!(e.tick().failed, 0);
        assert_eq!(matrix(&e, "coh").engine, ComputeTier::Cpu);
    }
    assert_eq!(constructed.load(Ordering::SeqCst), 1);
}
