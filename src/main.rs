//! stream-engine - Main Entry Point
//!
//! Runs a graph on the engine thread, optionally fed by the synthetic EEG
//! producer, and logs snapshots until the requested duration has elapsed.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use stream_engine::{
    config::{self, EngineConfig, LoggingConfig, SyntheticEegConfig},
    pipeline::{EngineMessage, GraphDef, NodeDef},
    Engine, SyntheticEegProducer,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "stream-engine", version, about = "Tick-driven dataflow engine")]
struct Args {
    /// Engine config file (TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Graph definition file; the built-in coherence demo when omitted
    #[arg(short, long)]
    graph: Option<PathBuf>,

    /// Seconds to run; runs until killed when omitted
    #[arg(short, long)]
    duration: Option<u64>,

    /// Override the configured tick rate
    #[arg(long)]
    tick_rate: Option<u32>,

    /// Seconds between logged snapshots
    #[arg(long, default_value_t = 2)]
    snapshot_interval: u64,

    /// Never try the GPU coherence tier
    #[arg(long)]
    cpu_only: bool,
}

fn init_logging(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    match &logging.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "stream-engine.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    }
}

/// Synthetic EEG into a coherence node, with the global sync logged and the
/// matrix published back on the bus
fn demo_graph(source_id: &str) -> GraphDef {
    GraphDef::new("coherence-demo")
        .node(NodeDef::source("eeg").with("source_id", source_id))
        .node(NodeDef::transform("coherence").op("coherence").input("eeg"))
        .node(
            NodeDef::transform("sync")
                .op("global_sync")
                .input("coherence"),
        )
        .node(NodeDef::transform("sync_smooth").op("ema").input("sync"))
        .node(NodeDef::sink("sync_log").op("log").input("sync_smooth"))
        .node(
            NodeDef::sink("coherence_out")
                .with("source_id", "coherence")
                .input("coherence"),
        )
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().or_else(config::default_config_path);
    let mut engine_config = match &config_path {
        Some(path) if args.config.is_some() => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        Some(path) => EngineConfig::load_or_default(path),
        None => EngineConfig::default(),
    };

    let _log_guard = init_logging(&engine_config.logging);
    tracing::info!("Starting stream-engine");

    if args.cpu_only {
        engine_config.coherence.prefer_gpu = false;
    }
    if let Some(hz) = args.tick_rate {
        engine_config.scheduler.tick_rate_hz = hz;
    }

    let graph = match &args.graph {
        Some(path) => config::load_graph_def(path)
            .with_context(|| format!("loading graph {}", path.display()))?,
        None => {
            // The demo graph needs a producer to be useful
            let synthetic = engine_config
                .producers
                .synthetic
                .get_or_insert_with(SyntheticEegConfig::default);
            demo_graph(&synthetic.source_id)
        }
    };

    let mut engine = Engine::new(&engine_config);
    engine
        .load_graph(graph)
        .context("graph definition rejected")?;
    if let Some(synthetic) = engine_config.producers.synthetic.clone() {
        engine.add_producer(Box::new(SyntheticEegProducer::new(synthetic)));
    }

    let (bridge, handle) = engine.spawn()?;
    bridge.start();

    let started = Instant::now();
    let deadline = args.duration.map(|s| started + Duration::from_secs(s));
    let snapshot_interval = Duration::from_secs(args.snapshot_interval.max(1));
    let mut last_snapshot = Instant::now();

    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        if last_snapshot.elapsed() >= snapshot_interval {
            bridge.request_snapshot();
            last_snapshot = Instant::now();
        }

        let mut exited = false;
        for msg in bridge.drain() {
            match msg {
                EngineMessage::Snapshot(snapshot) => match snapshot.to_json() {
                    Ok(json) => tracing::debug!("snapshot:\n{}", json),
                    Err(e) => tracing::warn!("Failed to serialize snapshot: {}", e),
                },
                EngineMessage::Stats(stats) => tracing::info!(
                    tick = stats.tick,
                    failures = stats.node_failures,
                    dropped = stats.frames_dropped,
                    max_tick_us = stats.max_tick_us,
                    "stats"
                ),
                EngineMessage::GraphError(e) => tracing::warn!("Graph error: {}", e),
                EngineMessage::Shutdown => exited = true,
                other => tracing::debug!("{:?}", other),
            }
        }
        if exited {
            tracing::warn!("Engine thread exited early");
            break;
        }

        std::thread::sleep(Duration::from_millis(50));
    }

    bridge.shutdown();
    if handle.join().is_err() {
        anyhow::bail!("engine thread panicked");
    }
    tracing::info!("Ran for {:.1}s", started.elapsed().as_secs_f64());
    Ok(())
}
