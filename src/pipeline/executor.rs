//! The engine: owns the graph, the bus inbox and the producers, and runs
//! ticks.
//!
//! A tick routes pending bus frames into source slots, then evaluates every
//! node once in topological order. A failing or panicking node keeps its
//! previous output and state; its downstream nodes run anyway on that stale
//! output.

use super::bridge::{EngineBridge, EngineCommand, EngineMessage};
use super::bus::{Bus, Inbox};
use super::error::{GraphError, NodeEvaluationError};
use super::graph::GraphStore;
use super::id::NodeId;
use super::node::{EvalContext, GraphDef, NodeDef, NodeInput, NodeKind};
use super::nodes::NodeFactory;
use super::plan::ExecutionPlan;
use super::snapshot::DebugSnapshot;
use crate::coherence::{BackendFactory, ComputeTier, TierGate};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::producer::Producer;
use crate::types::{Clock, SystemClock};
use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Outcome of one tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Tick number; the first tick after a graph load is 1
    pub tick: u64,
    /// Nodes that produced a new output
    pub evaluated: usize,
    /// Nodes that failed or panicked
    pub failed: usize,
    /// Nodes with nothing new to emit
    pub no_data: usize,
    /// True when the engine was stopped and nothing ran
    pub idle: bool,
    pub duration: Duration,
}

/// Running totals reported over the bridge
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineStats {
    pub running: bool,
    pub tick: u64,
    pub tick_rate_hz: u32,
    pub nodes: usize,
    pub nodes_evaluated: u64,
    pub node_failures: u64,
    pub frames_routed: u64,
    /// Frames lost because the inbox was full
    pub frames_dropped: u64,
    pub last_tick_us: u64,
    pub max_tick_us: u64,
}

pub struct Engine {
    store: GraphStore,
    plan: Option<ExecutionPlan>,
    bus: Bus,
    inbox: Inbox,
    clock: Arc<dyn Clock>,
    tier_gate: Arc<TierGate>,
    producers: Vec<Box<dyn Producer>>,
    running: bool,
    tick: u64,
    tick_rate_hz: u32,
    stats_interval: Duration,
    stats: EngineStats,
    last_tick_time: Option<Instant>,
}

impl Engine {
    pub fn new(config: &EngineConfig) -> Self {
        let tier_gate = Arc::new(TierGate::new());
        let factory = NodeFactory::new(config.coherence.clone(), Arc::clone(&tier_gate));
        let bus = Bus::new();
        let inbox = bus.inbox(config.bus.inbox_capacity);

        Self {
            store: GraphStore::new(factory),
            plan: None,
            bus,
            inbox,
            clock: Arc::new(SystemClock),
            tier_gate,
            producers: Vec::new(),
            running: false,
            tick: 0,
            tick_rate_hz: config.scheduler.tick_rate_hz,
            stats_interval: config.scheduler.stats_interval(),
            stats: EngineStats::default(),
            last_tick_time: None,
        }
    }

    /// Use `clock` for `last_update`, frame timestamps and decay
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the accelerator constructor used by coherence nodes.
    ///
    /// Only affects nodes built afterwards, so call it before loading a graph.
    pub fn with_backend_factory(mut self, backend_factory: BackendFactory) -> Self {
        let factory = self.store.factory().clone().with_backend_factory(backend_factory);
        self.store = GraphStore::new(factory);
        self.plan = None;
        self
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn graph(&self) -> &GraphStore {
        &self.store
    }

    pub fn tier_gate(&self) -> &Arc<TierGate> {
        &self.tier_gate
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn tick_rate_hz(&self) -> u32 {
        self.tick_rate_hz
    }

    pub fn set_tick_rate(&mut self, hz: u32) {
        self.tick_rate_hz = hz;
        tracing::info!("Tick rate set to {} Hz", hz);
    }

    /// Register a producer. It is started with the engine, or right away if
    /// the engine is already running.
    pub fn add_producer(&mut self, mut producer: Box<dyn Producer>) {
        if self.running {
            if let Err(e) = producer.start(self.bus.handle()) {
                tracing::warn!(producer = producer.name(), error = %e, "producer failed to start");
            }
        }
        self.producers.push(producer);
    }

    // ── Lifecycle ──

    /// Enter the Running state: re-arm the GPU tier, start producers and
    /// discard frames that arrived while stopped.
    pub fn start(&mut self) {
        if self.running {
            return;
        }

        self.tier_gate.rearm();
        let discarded = self.inbox.drain().len();
        if discarded > 0 {
            tracing::debug!("Discarded {} frames queued while stopped", discarded);
        }

        for producer in &mut self.producers {
            if let Err(e) = producer.start(self.bus.handle()) {
                tracing::warn!(producer = producer.name(), error = %e, "producer failed to start");
            }
        }

        self.running = true;
        self.last_tick_time = None;
        tracing::info!(
            graph = self.store.id(),
            nodes = self.store.len(),
            "Engine started"
        );
    }

    /// Enter the Stopped state and stop producers. Node state is kept.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        for producer in &mut self.producers {
            producer.stop();
        }
        self.running = false;
        tracing::info!(tick = self.tick, "Engine stopped");
    }

    // ── Graph construction ──

    /// Replace the graph and clear all node state. The engine is left
    /// stopped; on error nothing changes.
    pub fn load_graph(&mut self, def: GraphDef) -> std::result::Result<(), GraphError> {
        self.store.load_graph(def)?;
        self.stop();
        self.tick = 0;
        self.plan = None;
        tracing::info!(
            graph = self.store.id(),
            nodes = self.store.len(),
            "Graph loaded"
        );
        Ok(())
    }

    pub fn add_node(&mut self, def: NodeDef) -> std::result::Result<NodeId, GraphError> {
        let id = def.id.clone();
        let nid = self.store.add_node(def)?;
        tracing::info!("Added node '{}' ({:?})", id, nid);
        Ok(nid)
    }

    pub fn connect(&mut self, src: &str, dst: &str) -> std::result::Result<(), GraphError> {
        self.store.connect(src, dst)?;
        tracing::info!("Connected '{}' -> '{}'", src, dst);
        Ok(())
    }

    fn recompile_if_needed(&mut self) -> std::result::Result<(), GraphError> {
        if self
            .plan
            .as_ref()
            .is_some_and(|plan| plan.is_current(&self.store))
        {
            return Ok(());
        }

        let plan = ExecutionPlan::compile(&self.store)?;
        tracing::info!(
            "Graph recompiled: {} nodes, {} edges (gen {}, {} us)",
            plan.stats.total_nodes,
            plan.stats.edges,
            plan.generation,
            plan.stats.compile_time_us,
        );
        self.plan = Some(plan);
        Ok(())
    }

    // ── Tick ──

    /// Run one tick. While stopped, nothing is evaluated.
    pub fn tick(&mut self) -> TickReport {
        if !self.running {
            return TickReport {
                tick: self.tick,
                idle: true,
                ..TickReport::default()
            };
        }

        let started = Instant::now();
        if let Err(e) = self.recompile_if_needed() {
            tracing::error!(error = %e, "Cannot schedule graph");
            return TickReport {
                tick: self.tick,
                idle: true,
                ..TickReport::default()
            };
        }

        self.tick += 1;
        let now = self.clock.now_ms();
        self.route_frames();

        let order = self
            .plan
            .as_ref()
            .map(|plan| plan.order.clone())
            .unwrap_or_default();
        let handle = self.bus.handle();
        let mut fresh = vec![false; self.store.len()];
        let mut report = TickReport {
            tick: self.tick,
            ..TickReport::default()
        };

        for nid in order {
            let inputs = self.gather_inputs(nid, &fresh);
            let Some(record) = self.store.record_mut(nid) else {
                continue;
            };
            let frame = record.latest_frame.take();

            let ctx = EvalContext {
                node_id: &record.def.id,
                inputs: &inputs,
                config: &record.def.config,
                state: &record.state,
                now_ms: now,
                tick: self.tick,
                frame: frame.as_ref(),
                bus: (record.def.kind == NodeKind::Sink).then_some(&handle),
            };
            let behavior = &mut record.behavior;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| behavior.evaluate(&ctx)))
                .unwrap_or_else(|payload| {
                    Err(NodeEvaluationError::Panicked(panic_message(payload.as_ref())))
                });

            match outcome {
                Ok(evaluation) => {
                    let derived =
                        record.def.kind == NodeKind::Source || inputs.iter().any(|i| i.fresh);
                    record.last_output = evaluation.output;
                    if let Some(state) = evaluation.state {
                        record.state = state;
                    }
                    record.last_update = Some(now);
                    fresh[nid.index()] = evaluation.fresh.unwrap_or(derived);
                    report.evaluated += 1;
                }
                Err(NodeEvaluationError::NoData) => {
                    tracing::trace!(node = %record.def.id, tick = self.tick, "no data");
                    report.no_data += 1;
                }
                Err(e) => {
                    if matches!(e, NodeEvaluationError::Panicked(_)) {
                        tracing::error!(node = %record.def.id, tick = self.tick, error = %e, "node panicked");
                    } else {
                        tracing::warn!(node = %record.def.id, tick = self.tick, error = %e, "node evaluation failed");
                    }
                    record.error_count += 1;
                    record.last_error = Some(e.to_string());
                    report.failed += 1;
                }
            }
        }

        report.duration = started.elapsed();
        self.record_stats(&report);
        report
    }

    /// Positional inputs for `nid`, copied out of the upstream records
    fn gather_inputs(&self, nid: NodeId, fresh: &[bool]) -> Vec<NodeInput> {
        let Some(record) = self.store.record(nid) else {
            return Vec::new();
        };
        record
            .upstream
            .iter()
            .filter_map(|&up| {
                self.store.record(up).map(|upstream| NodeInput {
                    source: upstream.def.id.clone(),
                    value: upstream.last_output.clone(),
                    fresh: fresh.get(up.index()).copied().unwrap_or(false),
                })
            })
            .collect()
    }

    /// Move pending inbox frames into the latest-frame slots of the sources
    /// that accept them. Later frames overwrite earlier ones.
    fn route_frames(&mut self) {
        for frame in self.inbox.drain() {
            let mut routed = false;
            for record in self.store.records_mut() {
                if record.behavior.accepts_frame(&frame) {
                    record.latest_frame = Some(frame.clone());
                    routed = true;
                }
            }
            if routed {
                self.stats.frames_routed += 1;
            }
        }
    }

    fn record_stats(&mut self, report: &TickReport) {
        let tick_us = report.duration.as_micros() as u64;
        self.stats.nodes_evaluated += report.evaluated as u64;
        self.stats.node_failures += report.failed as u64;
        self.stats.last_tick_us = tick_us;
        self.stats.max_tick_us = self.stats.max_tick_us.max(tick_us);
    }

    // ── Observation ──

    /// Copy of every node in evaluation order
    pub fn snapshot(&self) -> DebugSnapshot {
        let order = match &self.plan {
            Some(plan) if plan.is_current(&self.store) => plan.order.clone(),
            _ => self
                .store
                .topological_order()
                .unwrap_or_else(|_| (0..self.store.len()).map(NodeId::from_index).collect()),
        };
        DebugSnapshot::capture(
            &self.store,
            &order,
            self.tick,
            self.running,
            self.clock.now_ms(),
        )
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            running: self.running,
            tick: self.tick,
            tick_rate_hz: self.tick_rate_hz,
            nodes: self.store.len(),
            frames_dropped: self.inbox.dropped(),
            ..self.stats.clone()
        }
    }

    /// Tier of the first coherence node's latest computation
    pub fn current_tier(&self) -> Option<ComputeTier> {
        self.store
            .records()
            .find_map(|record| record.behavior.coherence_tier())
    }

    // ── Main run loop ──

    /// Run until `running` is cleared, `Shutdown` is received or the command
    /// channel is closed.
    pub fn run(
        &mut self,
        cmd_rx: &Receiver<EngineCommand>,
        msg_tx: &Sender<EngineMessage>,
        running: &AtomicBool,
    ) {
        tracing::info!("Engine thread started");
        let mut last_stats_time = Instant::now();

        while running.load(Ordering::Relaxed) {
            if !self.process_commands(cmd_rx, msg_tx) {
                running.store(false, Ordering::Relaxed);
                break;
            }

            if self.running {
                self.last_tick_time = Some(Instant::now());
                self.tick();
            }

            // Send stats periodically
            if self.running && last_stats_time.elapsed() >= self.stats_interval {
                let stats = self.stats();
                tracing::debug!(
                    tick = stats.tick,
                    evaluated = stats.nodes_evaluated,
                    failures = stats.node_failures,
                    last_tick_us = stats.last_tick_us,
                    "engine stats"
                );
                reply(msg_tx, EngineMessage::Stats(stats));
                last_stats_time = Instant::now();
            }

            self.rate_limit();
        }

        self.stop();
        reply(msg_tx, EngineMessage::Shutdown);
        tracing::info!("Engine thread exiting");
    }

    /// Handle every queued command. Returns `false` when the loop should exit.
    fn process_commands(
        &mut self,
        cmd_rx: &Receiver<EngineCommand>,
        msg_tx: &Sender<EngineMessage>,
    ) -> bool {
        loop {
            let cmd = match cmd_rx.try_recv() {
                Ok(cmd) => cmd,
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => {
                    tracing::info!("Command channel closed");
                    return false;
                }
            };

            let message = match cmd {
                EngineCommand::LoadGraph(def) => {
                    let was_running = self.running;
                    match self.load_graph(def) {
                        Ok(()) => {
                            if was_running {
                                reply(msg_tx, EngineMessage::Stopped);
                            }
                            EngineMessage::GraphLoaded(self.store.id().to_string())
                        }
                        Err(e) => graph_error(e),
                    }
                }
                EngineCommand::AddNode(def) => {
                    let id = def.id.clone();
                    match self.add_node(def) {
                        Ok(_) => EngineMessage::NodeAdded(id),
                        Err(e) => graph_error(e),
                    }
                }
                EngineCommand::Connect { src, dst } => match self.connect(&src, &dst) {
                    Ok(()) => EngineMessage::Connected { src, dst },
                    Err(e) => graph_error(e),
                },
                EngineCommand::Start => {
                    self.start();
                    EngineMessage::Started
                }
                EngineCommand::Stop => {
                    self.stop();
                    EngineMessage::Stopped
                }
                EngineCommand::SetTickRate(hz) => {
                    self.set_tick_rate(hz);
                    continue;
                }
                EngineCommand::RequestSnapshot => EngineMessage::Snapshot(self.snapshot()),
                EngineCommand::RequestStats => EngineMessage::Stats(self.stats()),
                EngineCommand::Shutdown => {
                    tracing::info!("Shutdown requested");
                    return false;
                }
            };
            reply(msg_tx, message);
        }
    }

    fn rate_limit(&self) {
        if self.tick_rate_hz == 0 || !self.running {
            // Idle wait
            thread::sleep(Duration::from_millis(10));
            return;
        }

        let target_interval = Duration::from_nanos(1_000_000_000 / self.tick_rate_hz as u64);

        if let Some(last) = self.last_tick_time {
            let elapsed = last.elapsed();
            if elapsed < target_interval {
                let remaining = target_interval - elapsed;
                // Spin for sub-millisecond accuracy, sleep for larger waits
                if remaining > Duration::from_millis(2) {
                    thread::sleep(remaining - Duration::from_millis(1));
                }
                while last.elapsed() < target_interval {
                    std::hint::spin_loop();
                }
            }
        }
    }

    /// Move the engine onto its own thread.
    pub fn spawn(self) -> Result<(EngineBridge, JoinHandle<()>)> {
        let (bridge, cmd_rx, msg_tx) = EngineBridge::new();
        let mut engine = self;
        let handle = thread::Builder::new()
            .name("stream-engine".to_string())
            .spawn(move || {
                let running = AtomicBool::new(true);
                engine.run(&cmd_rx, &msg_tx, &running);
            })?;
        Ok((bridge, handle))
    }
}

/// Send to the host without ever blocking the tick loop
fn reply(msg_tx: &Sender<EngineMessage>, message: EngineMessage) {
    match msg_tx.try_send(message) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            tracing::warn!("Host is not draining engine messages, dropping one");
        }
        Err(TrySendError::Disconnected(_)) => {}
    }
}

fn graph_error(e: GraphError) -> EngineMessage {
    tracing::warn!(error = %e, "Graph command rejected");
    EngineMessage::GraphError(e)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
